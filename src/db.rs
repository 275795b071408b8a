use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Path of the vector collection database for a given persistence directory
/// and collection name.
pub fn collection_path(persist_dir: &Path, collection: &str) -> PathBuf {
    persist_dir.join(format!("{}.sqlite", collection))
}

pub async fn connect(persist_dir: &Path, collection: &str) -> Result<SqlitePool> {
    let db_path = collection_path(persist_dir, collection);

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
