// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Engram memory engine.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Engram workspace. The embedding pipeline,
//! LLM bridge implementations, and storage layer all implement traits defined
//! here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::EngramError;
pub use types::{
    AdapterType, HealthStatus, InitState, InitStatus, Observation, ObservationId, ObservationKind,
    Prompt, Session, SessionId, SessionStatus, SessionSummary,
};

// Re-export adapter traits at crate root.
pub use traits::{EmbeddingAdapter, LlmBridge, PluginAdapter};
