// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Types shared across the memory engine.

use engram_core::ObservationKind;
use serde::{Deserialize, Serialize};

/// A row in the persisted vector index.
#[derive(Debug, Clone)]
pub struct VectorRow {
    /// Matches the owning observation's id.
    pub id: String,
    pub embedding: Vec<f32>,
    pub project_id: String,
    pub kind: ObservationKind,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// A pending embedding job. In-memory only; lost on restart.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: String,
    pub text: String,
    pub project_id: String,
    pub kind: ObservationKind,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub retry_count: u32,
}

/// Which source list contributed a hybrid search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Lexical,
    Vector,
    Both,
}

/// One entry in a fused hybrid search result list. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct HybridSearchResult {
    pub id: String,
    pub kind: ObservationKind,
    pub title: String,
    pub excerpt: String,
    pub session_id: String,
    pub project_id: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Fused RRF score.
    pub score: f32,
    /// Raw BM25 score when the lexical list contained this id.
    pub fts_score: Option<f64>,
    /// Cosine similarity when the vector list contained this id.
    pub vector_score: Option<f32>,
    pub source: ResultSource,
}

/// Embedding model lifecycle, observable for UI polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderState {
    NotDownloaded,
    Downloading,
    Ready,
    Error,
}

/// Snapshot of embedding pipeline progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderStatus {
    pub state: EmbedderState,
    /// 0-100; approximated from the dominant model file during download.
    pub progress: u8,
    pub error: Option<String>,
}

impl EmbedderStatus {
    pub fn not_downloaded() -> Self {
        Self {
            state: EmbedderState::NotDownloaded,
            progress: 0,
            error: None,
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 (not NaN) when either vector has zero norm or the dimensions
/// differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
