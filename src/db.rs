use std::path::Path;
use std::sync::Mutex;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{KitchenPaError, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
static MIGRATION_GATE: Mutex<()> = Mutex::new(());
const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;";

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Creates the parent directory, runs pending migrations and builds a pool over
/// `sqlite_path`. Every store opens its own pool over the same file.
pub async fn open_pool(sqlite_path: &str) -> Result<SqlitePool> {
    ensure_parent_dir(sqlite_path)?;
    run_migrations(sqlite_path).await?;

    let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
    Pool::builder()
        .build(manager)
        .await
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))
}

pub async fn conn(pool: &SqlitePool) -> Result<SqlitePooledConn<'_>> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
    apply_pragmas_async(&mut conn).await?;
    Ok(conn)
}

pub fn open_connection_sync(sqlite_path: &str) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(sqlite_path)
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
    conn.batch_execute(CONNECTION_PRAGMAS)
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
    Ok(conn)
}

async fn apply_pragmas_async(conn: &mut SqliteAsyncConn) -> Result<()> {
    diesel_async::RunQueryDsl::execute(diesel::sql_query("PRAGMA busy_timeout = 5000"), conn)
        .await
        .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
    Ok(())
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
        }
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let _gate = MIGRATION_GATE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut conn = open_connection_sync(&database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| KitchenPaError::Runtime(e.to_string()))?;
        Ok::<_, KitchenPaError>(())
    })
    .await
    .map_err(|e| KitchenPaError::Runtime(e.to_string()))??;
    Ok(())
}

pub fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
