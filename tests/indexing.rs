//! Integration tests for the indexing pipeline: change detection, atomic
//! chunk-set replacement, cascading deletes, and feed watermarks.

mod common;

use common::{record, test_store, StubEmbedder, STUB_DIMS};

use lore::chunker::ChunkParams;
use lore::error::Error;
use lore::indexer::Indexer;
use lore::migrate;
use lore::models::{ChunkDraft, CollectionKind, FeedItem, SourceMeta};
use lore::store::Store;

fn params() -> ChunkParams {
    ChunkParams::new(500, 50).unwrap()
}

async fn collection(store: &Store, name: &str) -> i64 {
    store
        .get_or_create_collection(name, CollectionKind::Project, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unchanged_sources_skip_without_embedding_calls() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "notes").await;

    let records = vec![
        record("a.md", "alpha notes about the first topic"),
        record("b.md", "beta notes about the second topic"),
    ];

    let first = indexer.index_records(cid, &records, false).await.unwrap();
    assert_eq!(first.indexed, 2);
    assert_eq!(first.skipped, 0);
    let calls_after_first = embedder.calls();
    assert!(calls_after_first > 0);

    let second = indexer.index_records(cid, &records, false).await.unwrap();
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);
    // The second run never touched the embedding service.
    assert_eq!(embedder.calls(), calls_after_first);

    // force bypasses the fingerprint comparison.
    let forced = indexer.index_records(cid, &records, true).await.unwrap();
    assert_eq!(forced.updated, 2);
    assert!(embedder.calls() > calls_after_first);
}

#[tokio::test]
async fn test_changed_source_replaces_its_chunk_set() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "notes").await;

    let v1 = vec![record("doc.md", "alpha version oldword here")];
    indexer.index_records(cid, &v1, false).await.unwrap();
    assert_eq!(store.lexical_query("oldword", 10, None).await.unwrap().len(), 1);

    let v2 = vec![record("doc.md", "beta version newword here")];
    let summary = indexer.index_records(cid, &v2, false).await.unwrap();
    assert_eq!(summary.updated, 1);

    // Old entries are gone from both indexes; the new ones are visible.
    assert!(store.lexical_query("oldword", 10, None).await.unwrap().is_empty());
    assert_eq!(store.lexical_query("newword", 10, None).await.unwrap().len(), 1);

    let (_, sources, chunks, embeddings) = store.counts().await.unwrap();
    assert_eq!(sources, 1);
    assert_eq!(chunks, 1);
    assert_eq!(embeddings, 1);
}

#[tokio::test]
async fn test_dimension_mismatch_writes_nothing() {
    let (_tmp, _cfg, store) = test_store().await;
    let cid = collection(&store, "notes").await;

    let meta = SourceMeta {
        locator: "doc.md".to_string(),
        source_type: "markdown".to_string(),
        fingerprint: Some("f".to_string()),
        watermark: None,
        modified_at: None,
    };
    let chunks = vec![ChunkDraft {
        chunk_index: 0,
        title: "t".to_string(),
        text: "body".to_string(),
        metadata: serde_json::json!({}),
    }];
    let wrong = vec![vec![0.5f32; STUB_DIMS + 1]];

    let err = store
        .upsert_chunk_set(cid, &meta, &chunks, &wrong)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));

    // Rejected before any write: no source row either.
    assert!(store.find_source(cid, "doc.md").await.unwrap().is_none());
    let (_, sources, chunks, _) = store.counts().await.unwrap();
    assert_eq!(sources, 0);
    assert_eq!(chunks, 0);
}

#[tokio::test]
async fn test_empty_source_is_still_marked_indexed() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "notes").await;

    let records = vec![record("empty.md", "   \n\n  ")];
    let first = indexer.index_records(cid, &records, false).await.unwrap();
    assert_eq!(first.indexed, 1);

    let source = store.find_source(cid, "empty.md").await.unwrap().unwrap();
    assert!(source.fingerprint.is_some());
    let (_, _, chunks, _) = store.counts().await.unwrap();
    assert_eq!(chunks, 0);

    // Not re-parsed forever.
    let second = indexer.index_records(cid, &records, false).await.unwrap();
    assert_eq!(second.skipped, 1);
}

#[tokio::test]
async fn test_delete_collection_cascades_everywhere() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "doomed").await;

    let records = vec![
        record("a.md", "alpha cascade test"),
        record("b.md", "beta cascade test"),
    ];
    indexer.index_records(cid, &records, false).await.unwrap();

    assert!(store.delete_collection("doomed").await.unwrap());

    assert!(store.collection_info("doomed").await.unwrap().is_none());
    let (collections, sources, chunks, embeddings) = store.counts().await.unwrap();
    assert_eq!(
        (collections, sources, chunks, embeddings),
        (0, 0, 0, 0)
    );
    // Lexical entries are cleaned up too.
    assert!(store.lexical_query("cascade", 10, None).await.unwrap().is_empty());

    // Deleting again reports not found.
    assert!(!store.delete_collection("doomed").await.unwrap());
}

#[tokio::test]
async fn test_delete_source_removes_only_that_source() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "notes").await;

    let records = vec![
        record("keep.md", "alpha keepword content"),
        record("drop.md", "beta dropword content"),
    ];
    indexer.index_records(cid, &records, false).await.unwrap();

    let doomed = store.find_source(cid, "drop.md").await.unwrap().unwrap();
    store.delete_source(doomed.id).await.unwrap();

    assert!(store.find_source(cid, "drop.md").await.unwrap().is_none());
    assert!(store.lexical_query("dropword", 10, None).await.unwrap().is_empty());
    assert_eq!(store.lexical_query("keepword", 10, None).await.unwrap().len(), 1);
    let (_, sources, chunks, embeddings) = store.counts().await.unwrap();
    assert_eq!((sources, chunks, embeddings), (1, 1, 1));
}

#[tokio::test]
async fn test_feed_watermark_filters_old_items() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "mail").await;

    let feed = |cursor: &str, locator: &str| FeedItem {
        cursor: cursor.to_string(),
        record: record(locator, &format!("alpha message at {cursor}")),
    };

    let first_batch = vec![feed("2026-01-01", "m1"), feed("2026-01-02", "m2")];
    let summary = indexer.index_feed(cid, &first_batch, false).await.unwrap();
    assert_eq!(summary.indexed, 2);
    assert_eq!(
        store.max_watermark(cid).await.unwrap().as_deref(),
        Some("2026-01-02")
    );
    let calls_after_first = embedder.calls();

    // Re-delivering old items plus one new one only indexes the new one,
    // without fingerprinting or embedding the old ones.
    let second_batch = vec![
        feed("2026-01-01", "m1"),
        feed("2026-01-02", "m2"),
        feed("2026-01-03", "m3"),
    ];
    let summary = indexer.index_feed(cid, &second_batch, false).await.unwrap();
    assert_eq!(summary.indexed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(embedder.calls(), calls_after_first + 1);
    assert_eq!(
        store.max_watermark(cid).await.unwrap().as_deref(),
        Some("2026-01-03")
    );
}

#[tokio::test]
async fn test_model_change_invalidates_embeddings_and_fingerprints() {
    let (_tmp, cfg, store) = test_store().await;
    let embedder = StubEmbedder::new();
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "notes").await;

    let records = vec![record("a.md", "alpha content")];
    indexer.index_records(cid, &records, false).await.unwrap();
    let (_, _, _, embeddings) = store.counts().await.unwrap();
    assert_eq!(embeddings, 1);

    // Same dims, different model: the stored vectors belong to another
    // vector space now.
    migrate::ensure_embedding_meta(store.pool(), "other-model", cfg.embedding.dims)
        .await
        .unwrap();

    let (_, _, _, embeddings) = store.counts().await.unwrap();
    assert_eq!(embeddings, 0);
    let source = store.find_source(cid, "a.md").await.unwrap().unwrap();
    assert!(source.fingerprint.is_none());

    // The next run re-indexes instead of skipping.
    let summary = indexer.index_records(cid, &records, false).await.unwrap();
    assert_eq!(summary.updated, 1);
    let (_, _, _, embeddings) = store.counts().await.unwrap();
    assert_eq!(embeddings, 1);
}

#[tokio::test]
async fn test_embedding_outage_is_isolated_per_source() {
    let (_tmp, _cfg, store) = test_store().await;
    let embedder = common::DownEmbedder;
    let indexer = Indexer::new(&store, &embedder, 32, params());
    let cid = collection(&store, "notes").await;

    let records = vec![
        record("a.md", "alpha content"),
        record("b.md", "beta content"),
    ];
    let summary = indexer.index_records(cid, &records, false).await.unwrap();

    // Both sources fail, the run still reports instead of aborting, and
    // nothing is written for the failed sources.
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.indexed, 0);
    assert!(store.find_source(cid, "a.md").await.unwrap().is_none());
    assert!(store.find_source(cid, "b.md").await.unwrap().is_none());
}
