//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Each variant names who failed so callers can react differently:
//! parse and lock failures isolate a single source, embedding failures
//! degrade search to the lexical leg, and integrity or dimension failures
//! abort before anything is written.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A source could not be converted into a normalized record. Scoped to
    /// that one source; the rest of the run proceeds.
    #[error("failed to parse {locator}: {reason}")]
    ParseFailure { locator: String, reason: String },

    /// The embedding service could not be reached or rejected the batch.
    /// Indexing aborts the batch; search degrades to lexical-only.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The store's invariants would be broken by this write, or a stored
    /// row violates them.
    #[error("store integrity violation: {0}")]
    StoreIntegrity(String),

    /// A source file stayed locked through every read attempt.
    #[error("{locator} is locked (gave up after {attempts} attempts)")]
    SourceLocked { locator: String, attempts: u32 },

    /// A vector's dimension does not match the store's fixed dimension.
    /// Rejected before any write.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid chunking parameters (e.g. overlap not smaller than window).
    #[error("invalid chunk parameters: {0}")]
    ChunkParams(String),

    #[error(transparent)]
    Db(sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        // Constraint violations are integrity violations in our taxonomy;
        // everything else stays a database error.
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                return Error::StoreIntegrity(db_err.to_string());
            }
        }
        Error::Db(e)
    }
}
