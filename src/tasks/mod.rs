use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

use crate::db::{SqlitePool, SqlitePooledConn};
use crate::error::{KitchenPaError, Result};

mod schema;
use schema::tasks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Vital,
    Medium,
    Trivial,
}

impl Priority {
    /// Sort rank: vital first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Vital => 0,
            Priority::Medium => 1,
            Priority::Trivial => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Vital => "vital",
            Priority::Medium => "medium",
            Priority::Trivial => "trivial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vital" => Some(Priority::Vital),
            "medium" => Some(Priority::Medium),
            "trivial" => Some(Priority::Trivial),
            _ => None,
        }
    }

    /// Absent or unknown values fall back to medium.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or(Priority::Medium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i32,
    pub title: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: i64,
}

#[derive(Queryable)]
struct TaskRow {
    id: i32,
    title: String,
    priority: String,
    status: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTask<'a> {
    title: &'a str,
    priority: &'a str,
    status: &'a str,
    created_at: i64,
}

/// Orders open tasks by priority rank, then creation order.
pub fn sort_open_tasks(items: &mut [Task]) {
    items.sort_by_key(|task| (task.priority.rank(), task.id));
}

pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = crate::db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, title: &str, priority: Priority, now: i64) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(KitchenPaError::validation("task title is required"));
        }
        let mut conn = self.conn().await?;
        let new = NewTask {
            title,
            priority: priority.as_str(),
            status: TaskStatus::Todo.as_str(),
            created_at: now,
        };
        diesel::insert_into(tasks::table)
            .values(&new)
            .execute(&mut conn)
            .await?;

        let row: TaskRow = tasks::table
            .filter(tasks::title.eq(title))
            .order(tasks::id.desc())
            .first(&mut conn)
            .await?;
        tracing::debug!(task_id = row.id, priority = priority.as_str(), "Created task");
        Ok(map_row(row))
    }

    pub async fn create_many(
        &self,
        titles: &[String],
        priority: Priority,
        now: i64,
    ) -> Result<Vec<Task>> {
        let mut created = Vec::new();
        for title in titles {
            if title.trim().is_empty() {
                continue;
            }
            created.push(self.create(title, priority, now).await?);
        }
        Ok(created)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Task>> {
        let mut conn = self.conn().await?;
        let row = tasks::table
            .filter(tasks::id.eq(id))
            .first::<TaskRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(map_row))
    }

    pub async fn list_open(&self) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        let rows: Vec<TaskRow> = tasks::table
            .filter(tasks::status.eq(TaskStatus::Todo.as_str()))
            .load(&mut conn)
            .await?;
        let mut items: Vec<Task> = rows.into_iter().map(map_row).collect();
        sort_open_tasks(&mut items);
        Ok(items)
    }

    pub async fn list_all(&self) -> Result<Vec<Task>> {
        let mut conn = self.conn().await?;
        let rows: Vec<TaskRow> = tasks::table
            .order(tasks::id.asc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    pub async fn next_task(&self) -> Result<Option<Task>> {
        Ok(self.list_open().await?.into_iter().next())
    }

    pub async fn complete(&self, id: i32) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(tasks::table.filter(tasks::id.eq(id)))
            .set(tasks::status.eq(TaskStatus::Done.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    pub async fn set_priority(&self, id: i32, priority: Priority) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(tasks::table.filter(tasks::id.eq(id)))
            .set(tasks::priority.eq(priority.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(tasks::table.filter(tasks::id.eq(id)))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        crate::db::conn(&self.pool).await
    }
}

fn map_row(row: TaskRow) -> Task {
    Task {
        id: row.id,
        title: row.title,
        priority: Priority::parse_or_default(Some(&row.priority)),
        status: if row.status == "done" {
            TaskStatus::Done
        } else {
            TaskStatus::Todo
        },
        created_at: row.created_at,
    }
}
