//! Core data types that flow through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Namespace for indexed content. `system` collections are owned by built-in
/// adapters (notes, email, feeds); `project` collections are user-named
/// document buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    System,
    Project,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::System => "system",
            CollectionKind::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(CollectionKind::System),
            "project" => Some(CollectionKind::Project),
            _ => None,
        }
    }
}

/// Chunking policy selected per content class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    /// Split at heading boundaries, prefixing each chunk with its heading
    /// path so the chunk is self-describing out of context.
    HeadingAware,
    /// One chunk when short, paragraph splits otherwise (messages, emails).
    ShortForm,
    /// Sliding window fallback for unstructured text.
    FixedWindow,
}

/// Normalized record handed to the core by an external parser. The core
/// never parses raw file formats itself.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    /// Path or stable external id, unique within its collection.
    pub locator: String,
    /// Content hash used for change detection.
    pub fingerprint: String,
    pub title: String,
    pub text: String,
    /// Open key/value map (tags, sender, date, page numbers...).
    pub metadata: serde_json::Value,
    /// Source type tag (`markdown`, `plaintext`, `email`, ...).
    pub source_type: String,
    pub content_class: ContentClass,
    /// RFC 3339 timestamp of the backing content, when known.
    pub modified_at: Option<String>,
}

/// One item from an append-only feed, carrying a monotonically comparable
/// cursor (message date, article id). Items at or below the stored
/// watermark are not re-indexed.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub cursor: String,
    pub record: NormalizedRecord,
}

/// A chunk produced by the chunker, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// 0-based, unique within the owning source.
    pub chunk_index: i64,
    pub title: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Stored collection row.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub kind: CollectionKind,
    pub description: Option<String>,
    pub created_at: String,
}

/// Stored source row.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub collection_id: i64,
    pub source_type: String,
    pub locator: String,
    pub fingerprint: Option<String>,
    pub watermark: Option<String>,
    pub modified_at: Option<String>,
    pub last_indexed_at: Option<String>,
}

/// Source metadata written alongside a chunk-set replacement.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub locator: String,
    pub source_type: String,
    pub fingerprint: Option<String>,
    pub watermark: Option<String>,
    pub modified_at: Option<String>,
}

/// A ranked, attributed search hit. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub title: String,
    pub metadata: serde_json::Value,
    pub score: f64,
    pub collection: String,
    pub source_locator: String,
    pub source_type: String,
}

/// Optional post-fusion filters. Filters remove non-matching candidates;
/// they never alter fused scores or the pre-filter ordering of survivors.
/// Date bounds only apply to candidates carrying a `date` metadata key;
/// undated candidates pass through them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilters {
    pub collection: Option<String>,
    pub source_type: Option<String>,
    /// Inclusive lower bound, compared against the `date` metadata key
    /// (ISO dates compare lexicographically).
    pub date_from: Option<String>,
    /// Inclusive upper bound.
    pub date_to: Option<String>,
    /// Case-insensitive substring match on the `sender` metadata key.
    pub sender: Option<String>,
    /// Case-insensitive substring match against the `authors` metadata list.
    pub author: Option<String>,
}

/// Counts reported by one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    /// Sources indexed for the first time.
    pub indexed: u64,
    /// Sources re-indexed because their fingerprint changed (or force).
    pub updated: u64,
    /// Sources skipped because their content was unchanged.
    pub skipped: u64,
    /// Sources that failed and were isolated from the rest of the run.
    pub failed: u64,
}

impl std::fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "indexed: {}, updated: {}, skipped: {}, failed: {}",
            self.indexed, self.updated, self.skipped, self.failed
        )
    }
}
