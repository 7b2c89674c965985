//! Schema creation and versioned migrations.
//!
//! Five logical tables plus the FTS5 projection: collections, sources,
//! chunks, embeddings, meta, and `chunks_fts`. The `meta` table records the
//! schema version and the active embedding model/dimension so a model
//! change can invalidate stale vectors (mixed-dimension comparisons are
//! never issued).
//!
//! The FTS projection carries no triggers: it is maintained explicitly
//! inside the same transaction as every chunk write (see `store`), so a
//! committed write is fully visible to both query paths or to neither.

use sqlx::SqlitePool;

use crate::error::Error;

pub const SCHEMA_VERSION: i64 = 1;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL DEFAULT 'project',
            description TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            source_type TEXT NOT NULL,
            locator TEXT NOT NULL,
            fingerprint TEXT,
            watermark TEXT,
            modified_at TEXT,
            last_indexed_at TEXT,
            UNIQUE(collection_id, locator)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(source_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index: one fixed-dimension packed f32 blob per chunk.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                source_id UNINDEXED,
                title,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_collection_id ON chunks(collection_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_collection_id ON sources(collection_id)")
        .execute(pool)
        .await?;

    let version: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;

    if version.is_none() {
        sqlx::query("INSERT INTO meta (key, value) VALUES ('schema_version', ?)")
            .bind(SCHEMA_VERSION.to_string())
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Record the active embedding model and dimension. If either changed since
/// the last run, every stored embedding belongs to a different vector space
/// and is wiped; affected sources re-embed on their next indexing pass
/// because their fingerprints are cleared too.
pub async fn ensure_embedding_meta(
    pool: &SqlitePool,
    model: &str,
    dims: usize,
) -> Result<(), Error> {
    let stored_model: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_model'")
            .fetch_optional(pool)
            .await?;
    let stored_dims: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_dims'")
            .fetch_optional(pool)
            .await?;

    let dims_str = dims.to_string();
    let unchanged =
        stored_model.as_deref() == Some(model) && stored_dims.as_deref() == Some(&dims_str);

    if !unchanged {
        if stored_model.is_some() || stored_dims.is_some() {
            tracing::warn!(
                old_model = stored_model.as_deref().unwrap_or("?"),
                new_model = model,
                "embedding model changed; invalidating all stored embeddings"
            );
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
            sqlx::query("UPDATE sources SET fingerprint = NULL")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        sqlx::query(
            "INSERT INTO meta (key, value) VALUES ('embedding_model', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(model)
        .execute(pool)
        .await?;
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES ('embedding_dims', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(&dims_str)
        .execute(pool)
        .await?;
    }

    Ok(())
}
