//! Vector collection schema.
//!
//! The collection holds one row per chunk plus a BLOB embedding per chunk.
//! [`ensure_schema`] is idempotent; [`reset_schema`] drops and recreates
//! everything (used by index rebuild).

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            doc_source TEXT,
            section TEXT,
            file_type TEXT,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_source ON chunks(doc_source)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn reset_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS chunk_vectors")
        .execute(pool)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS chunks").execute(pool).await?;
    ensure_schema(pool).await
}

/// True iff both collection tables are present.
pub async fn schema_present(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('chunks', 'chunk_vectors')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 2)
}
