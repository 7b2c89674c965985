//! Dual index store: atomic persistence for chunks plus two retrieval
//! indexes over them.
//!
//! Every chunk owns exactly one embedding (packed f32 blob in `embeddings`)
//! and one lexical entry (`chunks_fts`). Both are written inside the same
//! transaction as the chunk itself, never via a separate asynchronous step,
//! so a committed write is fully visible to both query paths or to neither.
//! Chunk sets are replaced as a whole per source: a reader sees either the
//! old complete set or the new one, never a mix.
//!
//! Ownership cascades: collection → sources → chunks → embeddings. The
//! FTS projection has no foreign keys, so cascade paths delete it
//! explicitly inside the owning transaction.

use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::Error;
use crate::migrate;
use crate::models::{ChunkDraft, Collection, CollectionKind, Source, SourceMeta};

pub struct Store {
    pool: SqlitePool,
    dims: usize,
}

/// Collection row with aggregate counts, for listings.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub collection: Collection,
    pub source_count: i64,
    pub chunk_count: i64,
    pub last_indexed_at: Option<String>,
}

/// Detailed collection report, including a per-source-type breakdown.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub collection: Collection,
    pub source_count: i64,
    pub chunk_count: i64,
    pub embedding_count: i64,
    pub last_indexed_at: Option<String>,
    pub source_types: Vec<(String, i64)>,
}

/// A chunk joined with its attribution, produced by [`Store::hydrate`].
#[derive(Debug, Clone)]
pub struct HydratedChunk {
    pub chunk_id: i64,
    pub title: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub collection: String,
    pub source_locator: String,
    pub source_type: String,
}

impl Store {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    /// Open the database, run migrations, and reconcile embedding metadata.
    pub async fn open(config: &Config) -> Result<Self, Error> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        migrate::ensure_embedding_meta(&pool, &config.embedding.model, config.embedding.dims)
            .await?;
        Ok(Self::new(pool, config.embedding.dims))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    // ============ Collections ============

    pub async fn get_or_create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
        description: Option<&str>,
    ) -> Result<i64, Error> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO collections (name, kind, description) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(kind.as_str())
        .bind(description)
        .execute(&self.pool)
        .await?;

        tracing::info!(collection = name, kind = kind.as_str(), "created collection");
        Ok(result.last_insert_rowid())
    }

    pub async fn find_collection(&self, name: &str) -> Result<Option<Collection>, Error> {
        let row = sqlx::query(
            "SELECT id, name, kind, description, created_at FROM collections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(collection_from_row).transpose()?)
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionStats>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.kind, c.description, c.created_at,
                   (SELECT COUNT(*) FROM sources s WHERE s.collection_id = c.id) AS source_count,
                   (SELECT COUNT(*) FROM chunks ch WHERE ch.collection_id = c.id) AS chunk_count,
                   (SELECT MAX(s.last_indexed_at) FROM sources s WHERE s.collection_id = c.id) AS last_indexed
            FROM collections c
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CollectionStats {
                    source_count: row.get("source_count"),
                    chunk_count: row.get("chunk_count"),
                    last_indexed_at: row.get("last_indexed"),
                    collection: collection_from_row(row)?,
                })
            })
            .collect()
    }

    pub async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, Error> {
        let Some(collection) = self.find_collection(name).await? else {
            return Ok(None);
        };

        let source_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE collection_id = ?")
                .bind(collection.id)
                .fetch_one(&self.pool)
                .await?;
        let chunk_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection_id = ?")
                .bind(collection.id)
                .fetch_one(&self.pool)
                .await?;
        let embedding_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings e
             JOIN chunks c ON c.id = e.chunk_id WHERE c.collection_id = ?",
        )
        .bind(collection.id)
        .fetch_one(&self.pool)
        .await?;
        let last_indexed_at: Option<String> = sqlx::query_scalar(
            "SELECT MAX(last_indexed_at) FROM sources WHERE collection_id = ?",
        )
        .bind(collection.id)
        .fetch_one(&self.pool)
        .await?;

        let type_rows = sqlx::query(
            "SELECT source_type, COUNT(*) AS cnt FROM sources
             WHERE collection_id = ? GROUP BY source_type ORDER BY source_type",
        )
        .bind(collection.id)
        .fetch_all(&self.pool)
        .await?;
        let source_types = type_rows
            .into_iter()
            .map(|r| (r.get::<String, _>("source_type"), r.get::<i64, _>("cnt")))
            .collect();

        Ok(Some(CollectionInfo {
            collection,
            source_count,
            chunk_count,
            embedding_count,
            last_indexed_at,
            source_types,
        }))
    }

    /// Cascading delete of a collection and everything it owns. Returns
    /// false when no collection has that name.
    pub async fn delete_collection(&self, name: &str) -> Result<bool, Error> {
        let Some(collection) = self.find_collection(name).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;

        // FTS first: no foreign key covers the projection.
        sqlx::query(
            "DELETE FROM chunks_fts WHERE chunk_id IN
             (SELECT id FROM chunks WHERE collection_id = ?)",
        )
        .bind(collection.id)
        .execute(&mut *tx)
        .await?;

        // Sources, chunks, and embeddings cascade from here.
        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(collection.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(collection = name, "deleted collection");
        Ok(true)
    }

    // ============ Sources ============

    pub async fn find_source(
        &self,
        collection_id: i64,
        locator: &str,
    ) -> Result<Option<Source>, Error> {
        let row = sqlx::query(
            "SELECT id, collection_id, source_type, locator, fingerprint, watermark,
                    modified_at, last_indexed_at
             FROM sources WHERE collection_id = ? AND locator = ?",
        )
        .bind(collection_id)
        .bind(locator)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Source {
            id: r.get("id"),
            collection_id: r.get("collection_id"),
            source_type: r.get("source_type"),
            locator: r.get("locator"),
            fingerprint: r.get("fingerprint"),
            watermark: r.get("watermark"),
            modified_at: r.get("modified_at"),
            last_indexed_at: r.get("last_indexed_at"),
        }))
    }

    /// Highest watermark across a collection's sources: the feed cursor
    /// at or below which items have already been committed.
    pub async fn max_watermark(&self, collection_id: i64) -> Result<Option<String>, Error> {
        let watermark: Option<String> =
            sqlx::query_scalar("SELECT MAX(watermark) FROM sources WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(watermark)
    }

    /// Transactionally replace a source's chunk set: delete the old
    /// chunks/embeddings/lexical entries (if the source existed), insert
    /// the new set, and upsert the source row with its new fingerprint and
    /// `last_indexed_at`. Partial writes are never observable.
    ///
    /// Returns the source id and whether the source already existed.
    pub async fn upsert_chunk_set(
        &self,
        collection_id: i64,
        meta: &SourceMeta,
        chunks: &[ChunkDraft],
        embeddings: &[Vec<f32>],
    ) -> Result<(i64, bool), Error> {
        if chunks.len() != embeddings.len() {
            return Err(Error::StoreIntegrity(format!(
                "{} chunks but {} embeddings for {}",
                chunks.len(),
                embeddings.len(),
                meta.locator
            )));
        }
        // Dimension guard: reject before any write.
        for vector in embeddings {
            if vector.len() != self.dims {
                return Err(Error::DimensionMismatch {
                    expected: self.dims,
                    got: vector.len(),
                });
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM sources WHERE collection_id = ? AND locator = ?",
        )
        .bind(collection_id)
        .bind(&meta.locator)
        .fetch_optional(&mut *tx)
        .await?;

        let source_id = match existing {
            Some(id) => {
                sqlx::query("DELETE FROM chunks_fts WHERE source_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                // Embeddings cascade from the chunk delete.
                sqlx::query("DELETE FROM chunks WHERE source_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE sources SET source_type = ?, fingerprint = ?, watermark = ?,
                     modified_at = ?, last_indexed_at = ? WHERE id = ?",
                )
                .bind(&meta.source_type)
                .bind(&meta.fingerprint)
                .bind(&meta.watermark)
                .bind(&meta.modified_at)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO sources (collection_id, source_type, locator, fingerprint,
                                          watermark, modified_at, last_indexed_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(collection_id)
                .bind(&meta.source_type)
                .bind(&meta.locator)
                .bind(&meta.fingerprint)
                .bind(&meta.watermark)
                .bind(&meta.modified_at)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                result.last_insert_rowid()
            }
        };

        for (chunk, vector) in chunks.iter().zip(embeddings.iter()) {
            let metadata_json = if chunk.metadata.is_null() {
                None
            } else {
                Some(chunk.metadata.to_string())
            };

            let result = sqlx::query(
                "INSERT INTO chunks (source_id, collection_id, chunk_index, title, text, metadata)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(source_id)
            .bind(collection_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.title)
            .bind(&chunk.text)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await?;
            let chunk_id = result.last_insert_rowid();

            sqlx::query("INSERT INTO embeddings (chunk_id, vector) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, source_id, title, text) VALUES (?, ?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(source_id)
            .bind(&chunk.title)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((source_id, existing.is_some()))
    }

    /// Cascading delete of one source and its chunk set.
    pub async fn delete_source(&self, source_id: i64) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ============ Retrieval ============

    /// Nearest-neighbor query over the vector index: ascending cosine
    /// distance, ties broken by insertion order (chunk rowid).
    pub async fn vector_query(
        &self,
        query: &[f32],
        k: usize,
        collection_id: Option<i64>,
    ) -> Result<Vec<(i64, f64)>, Error> {
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }

        let rows = match collection_id {
            Some(cid) => {
                sqlx::query(
                    "SELECT e.chunk_id, e.vector FROM embeddings e
                     JOIN chunks c ON c.id = e.chunk_id
                     WHERE c.collection_id = ? ORDER BY e.chunk_id",
                )
                .bind(cid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT chunk_id, vector FROM embeddings ORDER BY chunk_id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut scored: Vec<(i64, f64)> = rows
            .into_iter()
            .map(|row| {
                let chunk_id: i64 = row.get("chunk_id");
                let blob: Vec<u8> = row.get("vector");
                (chunk_id, cosine_distance(query, &blob_to_vec(&blob)))
            })
            .collect();

        // Rows arrive in insertion order; the stable sort preserves it
        // for equal distances.
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Full-text query over the lexical index, best match first. The
    /// relevance scheme (FTS5/BM25 rank) is an implementation detail; only
    /// the ordering is a contract.
    pub async fn lexical_query(
        &self,
        query_text: &str,
        k: usize,
        collection_id: Option<i64>,
    ) -> Result<Vec<i64>, Error> {
        let match_expr = escape_fts_query(query_text);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = match collection_id {
            Some(cid) => {
                sqlx::query(
                    "SELECT chunks_fts.chunk_id FROM chunks_fts
                     JOIN chunks c ON c.id = chunks_fts.chunk_id
                     WHERE chunks_fts MATCH ? AND c.collection_id = ?
                     ORDER BY rank LIMIT ?",
                )
                .bind(&match_expr)
                .bind(cid)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id FROM chunks_fts WHERE chunks_fts MATCH ?
                     ORDER BY rank LIMIT ?",
                )
                .bind(&match_expr)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|r| r.get::<i64, _>(0)).collect())
    }

    /// Join chunk ids back to their text and attribution, preserving the
    /// input order. Ids that no longer exist are silently dropped.
    pub async fn hydrate(&self, chunk_ids: &[i64]) -> Result<Vec<HydratedChunk>, Error> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; chunk_ids.len()].join(", ");
        let sql = format!(
            "SELECT c.id, c.title, c.text, c.metadata,
                    co.name AS collection, s.locator, s.source_type
             FROM chunks c
             JOIN sources s ON s.id = c.source_id
             JOIN collections co ON co.id = c.collection_id
             WHERE c.id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in rows {
            let metadata: Option<String> = row.get("metadata");
            let metadata = metadata
                .and_then(|m| serde_json::from_str(&m).ok())
                .unwrap_or(serde_json::Value::Null);
            let chunk = HydratedChunk {
                chunk_id: row.get("id"),
                title: row.get("title"),
                text: row.get("text"),
                metadata,
                collection: row.get("collection"),
                source_locator: row.get("locator"),
                source_type: row.get("source_type"),
            };
            by_id.insert(chunk.chunk_id, chunk);
        }

        Ok(chunk_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    // ============ Status ============

    pub async fn schema_version(&self) -> Result<i64, Error> {
        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub async fn counts(&self) -> Result<(i64, i64, i64, i64), Error> {
        let collections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(&self.pool)
            .await?;
        let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok((collections, sources, chunks, embeddings))
    }
}

fn collection_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Collection, Error> {
    let kind: String = row.get("kind");
    let kind = CollectionKind::parse(&kind)
        .ok_or_else(|| Error::StoreIntegrity(format!("unknown collection kind: {kind}")))?;
    Ok(Collection {
        id: row.get("id"),
        name: row.get("name"),
        kind,
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

/// Convert a natural-language query into a safe FTS5 MATCH expression by
/// double-quoting every token (embedded quotes doubled). Keeps punctuation
/// in user queries from being read as FTS5 syntax.
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
