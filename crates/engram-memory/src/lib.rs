// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-project long-term memory engine for coding agents.
//!
//! Distills agent activity (tool calls, assistant messages) into typed
//! observations, embeds them with a local ONNX model, and retrieves them
//! through hybrid search (vector similarity + BM25 via FTS5, fused with RRF).
//!
//! ## Architecture
//!
//! - **MemoryService**: Composition root and session lifecycle hooks
//! - **Parser**: Heuristic tool/assistant-output classifier (10-kind taxonomy)
//! - **EmbeddingPipeline**: ONNX model lifecycle, 384-dim passage/query embedding
//! - **ModelManager**: First-run model download from HuggingFace
//! - **VectorIndex**: SQLite BLOB vector store with model-migration detection
//! - **EmbeddingQueue**: Readiness-gated backlog with bounded retries
//! - **InitManager**: Background init state machine for the embedding subsystem
//! - **HybridRanker**: Vector + BM25 + RRF fusion search
//! - **Enhancer**: Rate-limited LLM observation upgrades and session summaries

pub mod embedder;
pub mod enhancer;
pub mod hooks;
pub mod index;
pub mod init;
pub mod model_manager;
pub mod parser;
pub mod queue;
pub mod ranker;
pub mod types;

pub use embedder::EmbeddingPipeline;
pub use enhancer::Enhancer;
pub use hooks::{AssistantEvent, MemoryService, SessionStart, ToolEvent};
pub use index::{VectorIndex, VectorSearchOptions};
pub use init::{InitManager, ReadinessProbe};
pub use model_manager::ModelManager;
pub use queue::{EmbeddingQueue, ObservationIndexer, VectorSink};
pub use ranker::{reciprocal_rank_fusion, HybridRanker, SearchOptions};
pub use types::*;
