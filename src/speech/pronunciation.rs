use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use regex::Regex;
use serde::Serialize;

use super::schema::pronunciations;
use crate::db::{SqlitePool, SqlitePooledConn};
use crate::error::{KitchenPaError, Result};

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Queryable)]
pub struct Pronunciation {
    pub term: String,
    pub pronunciation: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = pronunciations)]
struct NewPronunciation<'a> {
    term: &'a str,
    pronunciation: &'a str,
    created_at: i64,
    updated_at: i64,
}

pub struct PronunciationStore {
    pool: SqlitePool,
}

impl PronunciationStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = crate::db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces the override for `term` (matched case-insensitively).
    pub async fn upsert(&self, term: &str, pronunciation: &str, now: i64) -> Result<()> {
        let term = term.trim();
        let pronunciation = pronunciation.trim();
        if term.is_empty() || pronunciation.is_empty() {
            return Err(KitchenPaError::validation(
                "term and pronunciation are both required",
            ));
        }
        let mut conn = self.conn().await?;
        diesel::insert_into(pronunciations::table)
            .values(&NewPronunciation {
                term,
                pronunciation,
                created_at: now,
                updated_at: now,
            })
            .on_conflict(pronunciations::term)
            .do_update()
            .set((
                pronunciations::pronunciation.eq(excluded(pronunciations::pronunciation)),
                pronunciations::updated_at.eq(excluded(pronunciations::updated_at)),
            ))
            .execute(&mut conn)
            .await?;
        tracing::debug!(term, "Saved pronunciation override");
        Ok(())
    }

    /// Latest update first.
    pub async fn list(&self) -> Result<Vec<Pronunciation>> {
        let mut conn = self.conn().await?;
        let rows = pronunciations::table
            .order((pronunciations::updated_at.desc(), pronunciations::term.asc()))
            .load::<Pronunciation>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        crate::db::conn(&self.pool).await
    }
}

/// Replaces every override term in `text`, longest term first and case-insensitively.
/// Single-word terms only match whole words.
pub fn apply_pronunciations(text: &str, overrides: &[Pronunciation]) -> String {
    let mut ordered: Vec<&Pronunciation> = overrides
        .iter()
        .filter(|p| !p.term.trim().is_empty())
        .collect();
    if ordered.is_empty() {
        return text.to_string();
    }
    ordered.sort_by(|a, b| b.term.chars().count().cmp(&a.term.chars().count()));

    let alternatives: Vec<String> = ordered
        .iter()
        .map(|p| {
            let term = p.term.trim();
            let escaped = regex::escape(term);
            if term.contains(' ') {
                escaped
            } else {
                format!(r"\b{escaped}\b")
            }
        })
        .collect();
    let pattern = format!("(?i)(?:{})", alternatives.join("|"));
    let Ok(re) = Regex::new(&pattern) else {
        tracing::warn!("Pronunciation pattern did not compile; speaking text unchanged");
        return text.to_string();
    };

    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        ordered
            .iter()
            .find(|p| p.term.trim().to_lowercase() == matched.to_lowercase())
            .map(|p| p.pronunciation.clone())
            .unwrap_or_else(|| matched.to_string())
    })
    .into_owned()
}
