//! Indexing coordinator: change detection, chunking, embedding, and
//! transactional handoff to the store.
//!
//! Per source: compare fingerprints (unchanged sources are skipped without
//! a single embedding call), chunk, embed, then replace the source's chunk
//! set in one transaction. A failing source, embedding batch included, is
//! caught, logged with its locator, and counted; the rest of the run
//! proceeds.
//!
//! Append-only feeds are filtered by watermark before fingerprinting: only
//! items whose cursor is above the collection's high-water mark are
//! considered at all. Each feed item commits independently, so the
//! watermark only ever covers fully indexed items and an interrupted run
//! resumes where it stopped.

use crate::chunker::{self, ChunkParams};
use crate::embedding::{embed_all, Embedder};
use crate::error::Error;
use crate::models::{FeedItem, IndexSummary, NormalizedRecord, SourceMeta};
use crate::store::Store;

pub struct Indexer<'a> {
    store: &'a Store,
    embedder: &'a dyn Embedder,
    batch_size: usize,
    params: ChunkParams,
}

enum Outcome {
    Indexed,
    Updated,
    Skipped,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a Store,
        embedder: &'a dyn Embedder,
        batch_size: usize,
        params: ChunkParams,
    ) -> Self {
        Self {
            store,
            embedder,
            batch_size,
            params,
        }
    }

    /// Index a batch of normalized records into a collection. `force`
    /// bypasses fingerprint comparison and re-indexes everything.
    pub async fn index_records(
        &self,
        collection_id: i64,
        records: &[NormalizedRecord],
        force: bool,
    ) -> Result<IndexSummary, Error> {
        let mut summary = IndexSummary::default();

        for record in records {
            match self.index_one(collection_id, record, None, force).await {
                Ok(Outcome::Indexed) => summary.indexed += 1,
                Ok(Outcome::Updated) => summary.updated += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(locator = %record.locator, error = %e, "failed to index source");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(collection_id, %summary, "indexing run finished");
        Ok(summary)
    }

    /// Index an append-only feed. Items at or below the collection's
    /// high-water mark are dropped up front; the surviving items are
    /// indexed oldest-first, each committing its own cursor as the source
    /// watermark.
    pub async fn index_feed(
        &self,
        collection_id: i64,
        items: &[FeedItem],
        force: bool,
    ) -> Result<IndexSummary, Error> {
        let high_water = self.store.max_watermark(collection_id).await?;
        let mut summary = IndexSummary::default();

        let mut pending: Vec<&FeedItem> = items
            .iter()
            .filter(|item| {
                force
                    || high_water
                        .as_deref()
                        .is_none_or(|high| item.cursor.as_str() > high)
            })
            .collect();
        pending.sort_by(|a, b| a.cursor.cmp(&b.cursor));

        if let Some(high) = &high_water {
            tracing::debug!(
                collection_id,
                high_water = %high,
                new_items = pending.len(),
                "feed watermark filter applied"
            );
        }

        for item in pending {
            let watermark = Some(item.cursor.clone());
            match self
                .index_one(collection_id, &item.record, watermark, force)
                .await
            {
                Ok(Outcome::Indexed) => summary.indexed += 1,
                Ok(Outcome::Updated) => summary.updated += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(locator = %item.record.locator, error = %e, "failed to index feed item");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn index_one(
        &self,
        collection_id: i64,
        record: &NormalizedRecord,
        watermark: Option<String>,
        force: bool,
    ) -> Result<Outcome, Error> {
        let existing = self
            .store
            .find_source(collection_id, &record.locator)
            .await?;

        if !force {
            if let Some(source) = &existing {
                if source.fingerprint.as_deref() == Some(record.fingerprint.as_str()) {
                    tracing::debug!(locator = %record.locator, "unchanged, skipping");
                    return Ok(Outcome::Skipped);
                }
            }
        }

        let chunks = chunker::chunk(
            record.content_class,
            &record.title,
            &record.text,
            &record.metadata,
            &self.params,
        );
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embed_all(self.embedder, &texts, self.batch_size).await?;

        // An empty source still gets its source row and fingerprint, so it
        // is skipped next run rather than re-parsed forever.
        let meta = SourceMeta {
            locator: record.locator.clone(),
            source_type: record.source_type.clone(),
            fingerprint: Some(record.fingerprint.clone()),
            watermark,
            modified_at: record.modified_at.clone(),
        };
        let (_, existed) = self
            .store
            .upsert_chunk_set(collection_id, &meta, &chunks, &embeddings)
            .await?;

        tracing::debug!(
            locator = %record.locator,
            chunks = chunks.len(),
            updated = existed,
            "indexed source"
        );
        Ok(if existed {
            Outcome::Updated
        } else {
            Outcome::Indexed
        })
    }
}
