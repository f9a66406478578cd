// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Engram memory engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Unique identifier for a memory session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Unique identifier for an observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationId(pub String);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter in the plugin registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Embedding,
    Provider,
    Storage,
}

/// The fixed observation taxonomy.
///
/// Every observation the parser produces is assigned exactly one kind.
/// Serialized as lowercase strings for SQLite storage and vector index rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Explore,
    Research,
    Implement,
    Fix,
    Refactor,
    Edit,
    Compose,
    Analyze,
    Decision,
    Conversation,
}

impl ObservationKind {
    /// Kinds that carry tool-derived project knowledge rather than chat flow.
    ///
    /// Used by recency fallbacks that prefer substantive observations.
    pub fn is_conversational(&self) -> bool {
        matches!(self, ObservationKind::Conversation)
    }
}

/// Readiness of the embedding/index subsystem as a whole.
///
/// The embedding queue reads this to decide whether a drain attempt is
/// worthwhile, will become worthwhile later, or will never succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InitState {
    Initializing,
    Retrying,
    Failed,
    Ready,
}

/// Snapshot of the initialization manager's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStatus {
    pub state: InitState,
    /// Epoch milliseconds of the next scheduled retry, when `state` is `Retrying`.
    pub next_retry_at_ms: Option<i64>,
}

/// A distilled unit of agent activity.
///
/// Created once by the observation parser (optionally upgraded in place by
/// the enhancer before persistence, never after), immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Unique identifier.
    pub id: String,
    /// Owning memory session.
    pub session_id: String,
    /// Partition key for retrieval scoping.
    pub project_id: String,
    /// Taxonomy kind assigned by the parser.
    pub kind: ObservationKind,
    /// Short headline for context blocks.
    pub title: String,
    /// Secondary detail line.
    pub subtitle: String,
    /// Free-text account of the event; the primary embedding source.
    pub narrative: String,
    /// Ordered list of notable facts.
    pub facts: Vec<String>,
    /// Tags from the fixed concept vocabulary.
    pub concepts: Vec<String>,
    /// Paths the tool read.
    pub files_read: Vec<String>,
    /// Paths the tool modified.
    pub files_modified: Vec<String>,
    /// Originating tool, when the source was a tool call.
    pub tool_name: Option<String>,
    /// Tool call id, used as a dedup key.
    pub tool_call_id: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// Lifecycle status of a memory session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Session is running; events are being recorded.
    Active,
    /// Session ended normally.
    Completed,
    /// Session ended via an explicit failure signal.
    Failed,
}

impl SessionStatus {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Active,
        }
    }
}

/// One memory session per chat turn-sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Correlation key used by the surrounding chat system.
    pub sub_chat_id: String,
    pub project_id: String,
    pub chat_id: String,
    pub status: SessionStatus,
    /// Epoch milliseconds.
    pub started_at: i64,
    /// Epoch milliseconds, set when the session leaves `Active`.
    pub completed_at: Option<i64>,
    /// Present once the summarizer has run.
    pub summary: Option<SessionSummary>,
}

/// Five-field session summary produced at session end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub request: String,
    pub investigated: String,
    pub learned: String,
    pub completed: String,
    pub next_steps: String,
}

/// A persisted user prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub text: String,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

/// Output from an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}
