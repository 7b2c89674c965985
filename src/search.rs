//! Search orchestrator: two retrieval legs fused by Reciprocal Rank Fusion.
//!
//! Both legs over-fetch (`candidate_limit` each) and run concurrently
//! against the unfiltered corpus. Fusion works on 1-based ranks only, never
//! on raw scores, so the cosine-distance and BM25 scales never have to be
//! reconciled:
//!
//! ```text
//! fused(c) = vector_weight / (rrf_k + vector_rank(c))
//!          + fts_weight   / (rrf_k + fts_rank(c))
//! ```
//!
//! A candidate absent from one leg contributes zero for that leg. Filters
//! are applied after fusion, by removal only, so a filtered search returns
//! exactly the matching subset of the unfiltered ranking in its original
//! order.
//!
//! When the embedding service is down the search degrades to the lexical
//! leg alone and says so via `degraded` instead of failing.

use serde::Serialize;

use crate::config::SearchConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::Error;
use crate::models::{SearchFilters, SearchResult};
use crate::store::{HydratedChunk, Store};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub filters: SearchFilters,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// True when the vector leg was skipped because the embedding service
    /// was unreachable.
    pub degraded: bool,
}

/// Fusion constants, lifted out of [`SearchConfig`] so the pure fusion
/// step can be exercised without a store.
#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    pub rrf_k: f64,
    pub vector_weight: f64,
    pub fts_weight: f64,
}

impl From<&SearchConfig> for FusionParams {
    fn from(config: &SearchConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            vector_weight: config.vector_weight,
            fts_weight: config.fts_weight,
        }
    }
}

pub async fn search(
    store: &Store,
    embedder: &dyn Embedder,
    config: &SearchConfig,
    request: &SearchRequest,
) -> Result<SearchResponse, Error> {
    let candidate_limit = config.candidate_limit.max(request.top_k);
    let fusion = FusionParams::from(config);

    // The vector leg is skipped, not fatal, when the service is down.
    let query_vector = match embed_query(embedder, &request.query).await {
        Ok(v) => Some(v),
        Err(Error::EmbeddingUnavailable(reason)) => {
            tracing::warn!(%reason, "embedding service unavailable, lexical-only search");
            None
        }
        Err(e) => return Err(e),
    };

    let (vector_ids, lexical_ids) = match &query_vector {
        Some(vector) => {
            let (vector_leg, lexical_leg) = tokio::join!(
                store.vector_query(vector, candidate_limit, None),
                store.lexical_query(&request.query, candidate_limit, None),
            );
            let vector_ids: Vec<i64> = vector_leg?.into_iter().map(|(id, _)| id).collect();
            (vector_ids, lexical_leg?)
        }
        None => {
            let lexical_ids = store
                .lexical_query(&request.query, candidate_limit, None)
                .await?;
            (Vec::new(), lexical_ids)
        }
    };

    let fused = rrf_fuse(&vector_ids, &lexical_ids, fusion);

    let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
    let hydrated = store.hydrate(&ids).await?;

    let score_of: std::collections::HashMap<i64, f64> = fused.into_iter().collect();
    let results: Vec<SearchResult> = hydrated
        .into_iter()
        .filter(|chunk| matches_filters(chunk, &request.filters))
        .take(request.top_k)
        .map(|chunk| SearchResult {
            score: score_of.get(&chunk.chunk_id).copied().unwrap_or(0.0),
            content: chunk.text,
            title: chunk.title,
            metadata: chunk.metadata,
            collection: chunk.collection,
            source_locator: chunk.source_locator,
            source_type: chunk.source_type,
        })
        .collect();

    Ok(SearchResponse {
        results,
        degraded: query_vector.is_none(),
    })
}

/// Fuse two ranked candidate lists into one ranking by weighted reciprocal
/// rank. Pure and deterministic: ties break toward the better vector rank,
/// then toward the smaller chunk id.
pub fn rrf_fuse(
    vector_ids: &[i64],
    lexical_ids: &[i64],
    params: FusionParams,
) -> Vec<(i64, f64)> {
    use std::collections::HashMap;

    // 1-based ranks.
    let vector_rank: HashMap<i64, usize> = vector_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i + 1))
        .collect();
    let fts_rank: HashMap<i64, usize> = lexical_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i + 1))
        .collect();

    let mut candidates: Vec<i64> = Vec::with_capacity(vector_ids.len() + lexical_ids.len());
    candidates.extend_from_slice(vector_ids);
    for &id in lexical_ids {
        if !vector_rank.contains_key(&id) {
            candidates.push(id);
        }
    }

    let mut scored: Vec<(i64, f64, usize)> = candidates
        .into_iter()
        .map(|id| {
            let mut score = 0.0;
            if let Some(&rank) = vector_rank.get(&id) {
                score += params.vector_weight / (params.rrf_k + rank as f64);
            }
            if let Some(&rank) = fts_rank.get(&id) {
                score += params.fts_weight / (params.rrf_k + rank as f64);
            }
            // Missing vector rank sorts after any present one.
            (id, score, vector_rank.get(&id).copied().unwrap_or(usize::MAX))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
            .then(a.0.cmp(&b.0))
    });

    scored.into_iter().map(|(id, score, _)| (id, score)).collect()
}

fn matches_filters(chunk: &HydratedChunk, filters: &SearchFilters) -> bool {
    if let Some(collection) = &filters.collection {
        if &chunk.collection != collection {
            return false;
        }
    }
    if let Some(source_type) = &filters.source_type {
        if &chunk.source_type != source_type {
            return false;
        }
    }

    // ISO dates compare lexicographically. An undated candidate passes
    // date bounds; only a present date can violate them.
    if let Some(date) = chunk.metadata.get("date").and_then(|v| v.as_str()) {
        if let Some(from) = &filters.date_from {
            if date < from.as_str() {
                return false;
            }
        }
        if let Some(to) = &filters.date_to {
            if date > to.as_str() {
                return false;
            }
        }
    }

    if let Some(sender) = &filters.sender {
        let matched = chunk
            .metadata
            .get("sender")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.to_lowercase().contains(&sender.to_lowercase()));
        if !matched {
            return false;
        }
    }

    if let Some(author) = &filters.author {
        let needle = author.to_lowercase();
        let matched = match chunk.metadata.get("authors") {
            Some(serde_json::Value::Array(authors)) => authors
                .iter()
                .filter_map(|a| a.as_str())
                .any(|a| a.to_lowercase().contains(&needle)),
            Some(serde_json::Value::String(a)) => a.to_lowercase().contains(&needle),
            _ => false,
        };
        if !matched {
            return false;
        }
    }

    true
}
