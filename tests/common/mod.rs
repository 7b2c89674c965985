//! Shared fixtures: a deterministic in-process embedder and a store over a
//! temporary database, so tests never need the real embedding service.

// Each test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use lore::config::Config;
use lore::embedding::Embedder;
use lore::error::Error;
use lore::models::{ContentClass, NormalizedRecord};
use lore::scan::fingerprint;
use lore::store::Store;

pub const STUB_DIMS: usize = 4;

/// Marker words projected onto one dimension each, so texts sharing marker
/// words are close in vector space and everything stays deterministic.
const MARKERS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

pub struct StubEmbedder {
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of embed_batch calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v = vec![0.0f32; STUB_DIMS];
                for word in lower.split_whitespace() {
                    let word = word.trim_matches(|c: char| !c.is_alphanumeric());
                    if let Some(i) = MARKERS.iter().position(|m| *m == word) {
                        v[i] += 1.0;
                    }
                }
                // Never a zero vector.
                v[0] += 0.01;
                v
            })
            .collect())
    }

    fn dims(&self) -> usize {
        STUB_DIMS
    }

    fn model(&self) -> &str {
        "stub"
    }
}

/// An embedder standing in for a service that is down.
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        Err(Error::EmbeddingUnavailable("connection refused".into()))
    }

    fn dims(&self) -> usize {
        STUB_DIMS
    }

    fn model(&self) -> &str {
        "down"
    }
}

/// Temp-dir database with defaults sized for the stub embedder.
pub fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::with_db_path(tmp.path().join("lore.db"));
    cfg.embedding.dims = STUB_DIMS;
    cfg
}

pub async fn test_store() -> (TempDir, Config, Store) {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let store = Store::open(&cfg).await.unwrap();
    (tmp, cfg, store)
}

pub fn record(locator: &str, text: &str) -> NormalizedRecord {
    record_with(locator, text, serde_json::json!({}))
}

pub fn record_with(locator: &str, text: &str, metadata: serde_json::Value) -> NormalizedRecord {
    NormalizedRecord {
        locator: locator.to_string(),
        fingerprint: fingerprint(text.as_bytes()),
        title: locator.to_string(),
        text: text.to_string(),
        metadata,
        source_type: "markdown".to_string(),
        content_class: ContentClass::HeadingAware,
        modified_at: None,
    }
}
