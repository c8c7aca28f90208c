use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    fs::{OpenOptions, create_dir_all},
    path::Path,
    time::Duration,
};

const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens the connection pool backing the device store.
/// In-memory databases are limited to one connection so every query sees the same data.
pub async fn create_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");
    if !in_memory {
        ensure_database_file(database_url)?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Makes sure the database file and its parent directory exist
fn ensure_database_file(database_url: &str) -> std::io::Result<()> {
    let path = Path::new(database_url.trim_start_matches("sqlite:"));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            create_dir_all(parent)?;
        }
    }

    if !path.exists() {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}
