//! Embedding client and vector utilities.
//!
//! [`Embedder`] is the seam between the core and the external embedding
//! service: an ordered batch of UTF-8 texts in, an equal-length ordered list
//! of fixed-dimension vectors out. Any transport failure (connection
//! refused, timeout, unknown model) surfaces as a single
//! [`Error::EmbeddingUnavailable`] for the whole batch.
//!
//! [`HttpEmbedder`] talks to an Ollama-compatible service
//! (`POST {endpoint}/api/embed`). The request timeout is generous because
//! the first call can trigger model loading; timeouts are not retried.
//! The batch fails and the caller moves on.
//!
//! Vector blob helpers ([`vec_to_blob`] / [`blob_to_vec`]) pack embeddings
//! as little-endian f32 bytes for SQLite BLOB storage.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::Error;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one batch of texts, preserving order. The batch is all-or-nothing.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error>;

    /// Fixed output dimension of the active model.
    fn dims(&self) -> usize;

    fn model(&self) -> &str;
}

/// Embed an arbitrary number of texts by slicing them into fixed-size
/// batches. A failed batch fails the whole call; partial results are never
/// returned.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, Error> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let mut all = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        if texts.len() > batch_size {
            tracing::info!(
                batch = i + 1,
                total = texts.len().div_ceil(batch_size.max(1)),
                "embedding batch"
            );
        }
        all.extend(embedder.embed_batch(batch).await?);
    }
    Ok(all)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, Error> {
    let mut vectors = embedder.embed_batch(&[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".into()))
}

/// HTTP client for an Ollama-compatible embedding endpoint.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    dims: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            client,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::EmbeddingUnavailable(format!(
                        "cannot connect to embedding service at {}: {e}",
                        self.endpoint
                    ))
                } else if e.is_timeout() {
                    Error::EmbeddingUnavailable(format!("embedding request timed out: {e}"))
                } else {
                    Error::EmbeddingUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding service returned {status}: {detail}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("invalid response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        for vector in &parsed.embeddings {
            if vector.len() != self.dims {
                return Err(Error::DimensionMismatch {
                    expected: self.dims,
                    got: vector.len(),
                });
            }
        }

        Ok(parsed.embeddings)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Encode a float vector as a BLOB of little-endian f32 bytes
/// (`vec.len() × 4` bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`. Returns 0 for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance: 0 = identical meaning, larger = less similar.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - f64::from(cosine_similarity(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
        assert_eq!(vec_to_blob(&vec).len(), 20);
    }

    #[test]
    fn test_cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
