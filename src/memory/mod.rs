//! Long-term facts for conversational grounding and the rolling conversation log.
//!
//! Retrieval ranks stored embeddings by cosine similarity to the prompt and falls back to
//! the newest rows when nothing is embedded or the embedding call fails. Each kind has
//! its own population cap; pruning keeps the most recently used rows.

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Arc;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::db::{SqlitePool, SqlitePooledConn};
use crate::error::Result;
use crate::interfaces::providers::LlmProvider;

mod schema;
use schema::{conversation_messages, memories};

pub const SHORT_WORD_LIMIT: usize = 50;
pub const DEFAULT_TOP_K: usize = 8;
pub const DEFAULT_FALLBACK_LIMIT: usize = 20;
pub const DEFAULT_SHORT_CAP: usize = 300;
pub const DEFAULT_LONG_CAP: usize = 200;
const EMBEDDING_CACHE_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Short,
    Long,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::Short => "short",
            MemoryKind::Long => "long",
        }
    }

    pub fn for_word_count(word_count: usize) -> Self {
        if word_count <= SHORT_WORD_LIMIT {
            MemoryKind::Short
        } else {
            MemoryKind::Long
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    pub id: i32,
    pub summary: String,
    pub kind: MemoryKind,
    pub word_count: i32,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

impl Memory {
    fn recency(&self) -> i64 {
        self.last_used_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessage {
    pub id: i32,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    pub top_k: usize,
    pub fallback_limit: usize,
    pub short_cap: usize,
    pub long_cap: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            fallback_limit: DEFAULT_FALLBACK_LIMIT,
            short_cap: DEFAULT_SHORT_CAP,
            long_cap: DEFAULT_LONG_CAP,
        }
    }
}

impl MemoryLimits {
    pub fn cap_for(&self, kind: MemoryKind) -> usize {
        match kind {
            MemoryKind::Short => self.short_cap,
            MemoryKind::Long => self.long_cap,
        }
    }
}

#[derive(Queryable)]
struct MemoryRow {
    id: i32,
    summary: String,
    kind: String,
    word_count: i32,
    embedding: Option<Vec<u8>>,
    last_used_at: Option<i64>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = memories)]
struct NewMemory<'a> {
    summary: &'a str,
    kind: &'a str,
    word_count: i32,
    embedding: Option<Vec<u8>>,
    last_used_at: Option<i64>,
    created_at: i64,
}

#[derive(Queryable)]
struct MessageRow {
    id: i32,
    role: String,
    content: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = conversation_messages)]
struct NewMessage<'a> {
    role: &'a str,
    content: &'a str,
    created_at: i64,
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Zero on a dimension mismatch or a zero-length vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_f32_blob(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Ids to delete so that only the `keep` most recently used remain. Recency is
/// `last_used_at`, else `created_at`; newer ids win ties.
pub fn eviction_ids(items: &[Memory], keep: usize) -> Vec<i32> {
    let mut ordered: Vec<&Memory> = items.iter().collect();
    ordered.sort_by(|a, b| {
        b.recency()
            .cmp(&a.recency())
            .then_with(|| b.id.cmp(&a.id))
    });
    ordered.into_iter().skip(keep).map(|m| m.id).collect()
}

pub struct MemoryStore {
    pool: SqlitePool,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    embedder: Option<Arc<dyn LlmProvider>>,
    embedding_model: Option<String>,
    limits: MemoryLimits,
    embedding_cache: Arc<tokio::sync::Mutex<LruCache<String, Vec<f32>>>>,
}

impl MemoryStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = crate::db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        let cache_size = NonZeroUsize::new(EMBEDDING_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            pool,
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
            embedder: None,
            embedding_model: None,
            limits: MemoryLimits::default(),
            embedding_cache: Arc::new(tokio::sync::Mutex::new(LruCache::new(cache_size))),
        }
    }

    pub fn with_embedder(
        mut self,
        embedder: Arc<dyn LlmProvider>,
        embedding_model: Option<String>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.embedding_model = embedding_model;
        self
    }

    pub fn with_limits(mut self, limits: MemoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    /// Embeds `text` through the configured embedder. Prompt embeddings are cached.
    pub async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        {
            let mut cache = self.embedding_cache.lock().await;
            if let Some(hit) = cache.get(text) {
                return Ok(Some(hit.clone()));
            }
        }
        let vectors = embedder
            .embed(vec![text.to_string()], self.embedding_model.as_deref())
            .await?;
        let Some(vector) = vectors.into_iter().next() else {
            return Ok(None);
        };
        let mut cache = self.embedding_cache.lock().await;
        cache.put(text.to_string(), vector.clone());
        Ok(Some(vector))
    }

    /// Inserts a fact unless it is blank or already stored. Returns whether a row was added.
    pub async fn write(&self, summary: &str, embedding: Option<&[f32]>, now: i64) -> Result<bool> {
        let summary = summary.trim();
        if summary.is_empty() {
            return Ok(false);
        }
        let words = word_count(summary);
        let kind = MemoryKind::for_word_count(words);
        let new = NewMemory {
            summary,
            kind: kind.as_str(),
            word_count: words as i32,
            embedding: embedding.map(encode_f32_blob),
            last_used_at: None,
            created_at: now,
        };
        let mut conn = self.conn().await?;
        let inserted = diesel::insert_or_ignore_into(memories::table)
            .values(&new)
            .execute(&mut conn)
            .await?;
        Ok(inserted > 0)
    }

    /// Embeds (best effort), writes and prunes the fact's kind back to its cap.
    pub async fn remember(&self, summary: &str, now: i64) -> Result<bool> {
        let summary = summary.trim();
        if summary.is_empty() {
            return Ok(false);
        }
        let embedding = match self.embed(summary).await {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "Memory embedding failed; storing without vector");
                None
            }
        };

        let _guard = self.write_gate.lock().await;
        let inserted = self.write(summary, embedding.as_deref(), now).await?;
        if inserted {
            let kind = MemoryKind::for_word_count(word_count(summary));
            self.prune(kind, self.limits.cap_for(kind)).await?;
            tracing::debug!(kind = kind.as_str(), "Stored memory");
        }
        Ok(inserted)
    }

    /// Picks memories for a prompt and marks them used at `now`.
    pub async fn select(&self, prompt: &str, top_k: usize, now: i64) -> Result<Vec<Memory>> {
        let embedded = self.load_embedded().await?;
        let mut selected = Vec::new();

        if !embedded.is_empty() {
            match self.embed(prompt).await {
                Ok(Some(query)) => {
                    let mut scored: Vec<(f32, Memory)> = embedded
                        .into_iter()
                        .map(|memory| {
                            let score = memory
                                .embedding
                                .as_deref()
                                .map(|vector| cosine_similarity(&query, vector))
                                .unwrap_or(0.0);
                            (score, memory)
                        })
                        .collect();
                    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
                    selected = scored
                        .into_iter()
                        .take(top_k)
                        .map(|(_, memory)| memory)
                        .collect();
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Prompt embedding failed; using recent memories");
                }
            }
        }

        if selected.is_empty() {
            selected = self.list_recent(self.limits.fallback_limit).await?;
        }

        let ids: Vec<i32> = selected.iter().map(|m| m.id).collect();
        self.touch(&ids, now).await?;
        for memory in &mut selected {
            memory.last_used_at = Some(now);
        }
        Ok(selected)
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Memory>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MemoryRow> = memories::table
            .order((memories::created_at.desc(), memories::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_memory).collect())
    }

    pub async fn list_kind(&self, kind: MemoryKind) -> Result<Vec<Memory>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MemoryRow> = memories::table
            .filter(memories::kind.eq(kind.as_str()))
            .order(memories::id.asc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_memory).collect())
    }

    pub async fn touch(&self, ids: &[i32], now: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        diesel::update(memories::table.filter(memories::id.eq_any(ids)))
            .set(memories::last_used_at.eq(Some(now)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Deletes all but the `max_count` most recently used memories of `kind`.
    pub async fn prune(&self, kind: MemoryKind, max_count: usize) -> Result<usize> {
        let items = self.list_kind(kind).await?;
        if items.len() <= max_count {
            return Ok(0);
        }
        let doomed = eviction_ids(&items, max_count);
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(memories::table.filter(memories::id.eq_any(&doomed)))
            .execute(&mut conn)
            .await?;
        tracing::debug!(kind = kind.as_str(), deleted, "Pruned memories");
        Ok(deleted)
    }

    pub async fn append_message(&self, role: Role, content: &str, now: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(conversation_messages::table)
            .values(&NewMessage {
                role: role.as_str(),
                content,
                created_at: now,
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Messages at or after `since`, oldest first.
    pub async fn messages_since(&self, since: i64) -> Result<Vec<ConversationMessage>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MessageRow> = conversation_messages::table
            .filter(conversation_messages::created_at.ge(since))
            .order((
                conversation_messages::created_at.asc(),
                conversation_messages::id.asc(),
            ))
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ConversationMessage {
                id: row.id,
                role: row.role,
                content: row.content,
                created_at: row.created_at,
            })
            .collect())
    }

    /// The last `limit` user turns, oldest first.
    pub async fn recent_user_messages(&self, limit: i64) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut rows: Vec<String> = conversation_messages::table
            .filter(conversation_messages::role.eq(Role::User.as_str()))
            .order(conversation_messages::id.desc())
            .select(conversation_messages::content)
            .limit(limit)
            .load(&mut conn)
            .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn load_embedded(&self) -> Result<Vec<Memory>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MemoryRow> = memories::table
            .filter(memories::embedding.is_not_null())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_memory).collect())
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        crate::db::conn(&self.pool).await
    }
}

fn map_memory(row: MemoryRow) -> Memory {
    Memory {
        id: row.id,
        summary: row.summary,
        kind: if row.kind == "long" {
            MemoryKind::Long
        } else {
            MemoryKind::Short
        },
        word_count: row.word_count,
        embedding: row.embedding.as_deref().map(decode_f32_blob),
        last_used_at: row.last_used_at,
        created_at: row.created_at,
    }
}
