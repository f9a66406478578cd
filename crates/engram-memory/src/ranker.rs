// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid ranker fusing lexical and vector search via RRF.
//!
//! The ranker issues a BM25 query and a vector query concurrently, fuses
//! the two ranked lists with Reciprocal Rank Fusion, and hydrates the fused
//! ids into full results. A dead vector subsystem degrades to lexical-only
//! ranking; it never turns a search into an error. The ranker returns the
//! full ranked output; relevance-floor filtering is the consumer's policy.

use std::collections::HashMap;
use std::sync::Arc;

use engram_config::model::MemoryConfig;
use engram_core::{EngramError, ObservationKind};
use engram_storage::queries::{fts, observations};
use engram_storage::Database;
use tracing::warn;

use crate::index::{VectorIndex, VectorSearchOptions};
use crate::parser::truncate_chars;
use crate::types::{HybridSearchResult, ResultSource};

/// Characters of narrative carried into a result excerpt.
const EXCERPT_CHARS: usize = 200;

/// Filters for a hybrid search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub project_id: Option<String>,
    pub kind: Option<ObservationKind>,
    pub limit: usize,
}

/// Fuses lexical and vector candidate lists into one ranking.
pub struct HybridRanker {
    db: Database,
    index: Arc<VectorIndex>,
    config: MemoryConfig,
}

impl HybridRanker {
    pub fn new(db: Database, index: Arc<VectorIndex>, config: MemoryConfig) -> Self {
        Self { db, index, config }
    }

    /// Hybrid search.
    ///
    /// 1. Run BM25 and vector search concurrently
    /// 2. Fuse the two ranked lists with RRF
    /// 3. Hydrate fused ids into observations
    /// 4. Sort by fused score descending, truncate to `limit`
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<HybridSearchResult>, EngramError> {
        let limit = options.limit.max(1);
        let candidates = self.config.max_retrieval_results.max(limit);

        let vector_options = VectorSearchOptions {
            project_id: options.project_id.clone(),
            kind: options.kind,
            limit: candidates,
        };
        let (lexical, vector) = tokio::join!(
            fts::search_bm25(&self.db, options.project_id.as_deref(), query, candidates),
            self.index.search(query, &vector_options),
        );

        let lexical = lexical?;
        // Vector failures degrade to lexical-only ranking.
        let vector = match vector {
            Ok(hits) => hits.into_iter().map(|h| (h.id, h.score)).collect(),
            Err(e) => {
                warn!(error = %e, "vector search unavailable, ranking lexical-only");
                Vec::new()
            }
        };

        metrics::counter!("engram_hybrid_searches_total").increment(1);
        let fused = reciprocal_rank_fusion(&vector, &lexical, self.config.rrf_k);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let fts_scores: HashMap<&str, f64> =
            lexical.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let vector_scores: HashMap<&str, f32> =
            vector.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let ids: Vec<String> = fused.iter().map(|(id, _)| id.clone()).collect();
        let observations = observations::get_by_ids(&self.db, &ids).await?;
        let score_map: HashMap<&str, f32> =
            fused.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let mut results: Vec<HybridSearchResult> = observations
            .into_iter()
            .filter(|obs| options.kind.is_none_or(|k| obs.kind == k))
            .map(|obs| {
                let fts_score = fts_scores.get(obs.id.as_str()).copied();
                let vector_score = vector_scores.get(obs.id.as_str()).copied();
                let source = match (fts_score.is_some(), vector_score.is_some()) {
                    (true, true) => ResultSource::Both,
                    (false, true) => ResultSource::Vector,
                    _ => ResultSource::Lexical,
                };
                HybridSearchResult {
                    score: score_map.get(obs.id.as_str()).copied().unwrap_or(0.0),
                    excerpt: truncate_chars(&obs.narrative, EXCERPT_CHARS),
                    id: obs.id,
                    kind: obs.kind,
                    title: obs.title,
                    session_id: obs.session_id,
                    project_id: obs.project_id,
                    created_at: obs.created_at,
                    fts_score,
                    vector_score,
                    source,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }
}

/// Reciprocal Rank Fusion: merge two ranked lists into a single ranking.
///
/// RRF score for document d = sum(1 / (k + rank_i)) over each list containing
/// d, with 1-indexed ranks. k smooths the curve so rank-1 items do not
/// dominate disproportionately.
///
/// Both input lists arrive already sorted by relevance: vector by similarity
/// descending, BM25 by score ascending (more negative = more relevant).
pub fn reciprocal_rank_fusion(
    vector_results: &[(String, f32)],
    bm25_results: &[(String, f64)],
    k: f64,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for (rank, (id, _)) in vector_results.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += (1.0 / (k + rank as f64 + 1.0)) as f32;
    }

    for (rank, (id, _)) in bm25_results.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += (1.0 / (k + rank as f64 + 1.0)) as f32;
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}
