use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use crate::error::Result;

/// Open (creating if needed) the SQLite database file and run pending migrations.
pub(super) async fn open_pool<P: AsRef<Path>>(db_file: P) -> Result<SqlitePool> {
    let db_file = db_file.as_ref();
    if let Some(parent) = db_file.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let connect_opts = SqliteConnectOptions::new()
        .filename(db_file)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    debug!(path = %db_file.display(), "database ready");
    Ok(pool)
}

/// Private in-memory database; a single connection so every query sees the same data.
pub(super) async fn open_memory_pool() -> Result<SqlitePool> {
    let connect_opts = "sqlite::memory:".parse::<SqliteConnectOptions>()?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
