// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Engram memory engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Engram configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngramConfig {
    /// Retrieval and queue settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Embedding pipeline settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM enhancement and summarization settings.
    #[serde(default)]
    pub enhancement: EnhancementConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Retrieval, ranking, and embedding-queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Enable the memory system. When false, no memory operations occur.
    #[serde(default = "default_memory_enabled")]
    pub enabled: bool,

    /// Maximum number of candidate results per search method (pre-fusion).
    #[serde(default = "default_max_retrieval_results")]
    pub max_retrieval_results: usize,

    /// Reciprocal rank fusion smoothing constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Fused scores below this floor are excluded from prompt context.
    #[serde(default = "default_relevance_floor")]
    pub relevance_floor: f64,

    /// Hard timeout for context building on the interactive path, in ms.
    #[serde(default = "default_context_timeout_ms")]
    pub context_timeout_ms: u64,

    /// Maximum observations injected into a prompt context block.
    #[serde(default = "default_context_max_results")]
    pub context_max_results: usize,

    /// Per-item retry ceiling for embedding-queue failures.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Seconds between queue drain retries while infrastructure initializes.
    #[serde(default = "default_drain_retry_secs")]
    pub drain_retry_secs: u64,

    /// Queue depth above which a backlog warning is logged.
    #[serde(default = "default_backlog_warn_threshold")]
    pub backlog_warn_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_memory_enabled(),
            max_retrieval_results: default_max_retrieval_results(),
            rrf_k: default_rrf_k(),
            relevance_floor: default_relevance_floor(),
            context_timeout_ms: default_context_timeout_ms(),
            context_max_results: default_context_max_results(),
            max_retry_count: default_max_retry_count(),
            drain_retry_secs: default_drain_retry_secs(),
            backlog_warn_threshold: default_backlog_warn_threshold(),
        }
    }
}

fn default_memory_enabled() -> bool {
    true
}

fn default_max_retrieval_results() -> usize {
    50
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_relevance_floor() -> f64 {
    0.005
}

fn default_context_timeout_ms() -> u64 {
    2_000
}

fn default_context_max_results() -> usize {
    10
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_drain_retry_secs() -> u64 {
    15
}

fn default_backlog_warn_threshold() -> usize {
    100
}

/// Embedding pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Name of the local embedding model.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Directory for downloaded model files and the index fingerprint.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Ceiling on model acquisition time before the attempt is failed.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Texts are truncated to this many characters before embedding.
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,

    /// Batch embedding chunk size (items embedded sequentially per chunk).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            data_dir: default_data_dir(),
            init_timeout_secs: default_init_timeout_secs(),
            max_embed_chars: default_max_embed_chars(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("engram"))
        .unwrap_or_else(|| std::path::PathBuf::from("engram-data"))
        .to_string_lossy()
        .into_owned()
}

fn default_init_timeout_secs() -> u64 {
    300
}

fn default_max_embed_chars() -> usize {
    8_000
}

fn default_batch_size() -> usize {
    16
}

/// LLM enhancement and session summarization configuration.
///
/// Enhancement is opt-in: when no model is configured the rule-based
/// observations are used as-is and no LLM calls are made.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnhancementConfig {
    /// Enable LLM-based observation enhancement and session summaries.
    #[serde(default = "default_enhancement_enabled")]
    pub enabled: bool,

    /// Provider identifier passed to the LLM bridge.
    #[serde(default = "default_provider_id")]
    pub provider_id: String,

    /// Model identifier for enhancement calls (small model for cost).
    #[serde(default = "default_enhancement_model")]
    pub model_id: String,

    /// Sliding-window rate limit: max calls per window.
    #[serde(default = "default_max_calls_per_window")]
    pub max_calls_per_window: usize,

    /// Sliding-window rate limit: window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Raw tool output must exceed this length for enhancement to run.
    #[serde(default = "default_min_output_chars")]
    pub min_output_chars: usize,

    /// Max tokens requested per enhancement call.
    #[serde(default = "default_enhancement_max_tokens")]
    pub max_tokens: u32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: default_enhancement_enabled(),
            provider_id: default_provider_id(),
            model_id: default_enhancement_model(),
            max_calls_per_window: default_max_calls_per_window(),
            window_secs: default_window_secs(),
            min_output_chars: default_min_output_chars(),
            max_tokens: default_enhancement_max_tokens(),
        }
    }
}

fn default_enhancement_enabled() -> bool {
    false
}

fn default_provider_id() -> String {
    "anthropic".to_string()
}

fn default_enhancement_model() -> String {
    "claude-haiku-4-5-20250901".to_string()
}

fn default_max_calls_per_window() -> usize {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_min_output_chars() -> usize {
    200
}

fn default_enhancement_max_tokens() -> u32 {
    1024
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("engram").join("engram.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("engram.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = EngramConfig::default();
        assert!(config.memory.enabled);
        assert_eq!(config.memory.max_retry_count, 3);
        assert_eq!(config.memory.drain_retry_secs, 15);
        assert!((config.memory.rrf_k - 60.0).abs() < f64::EPSILON);
        assert!((config.memory.relevance_floor - 0.005).abs() < f64::EPSILON);
        assert_eq!(config.embedding.model_name, "all-MiniLM-L6-v2");
        assert!(!config.enhancement.enabled);
    }

    #[test]
    fn unknown_top_level_key_rejected() {
        let toml_str = r#"
[memory]
enabled = true

[nonsense]
value = 1
"#;
        assert!(toml::from_str::<EngramConfig>(toml_str).is_err());
    }

    #[test]
    fn unknown_section_key_rejected() {
        let toml_str = r#"
[memory]
enbaled = true
"#;
        assert!(toml::from_str::<EngramConfig>(toml_str).is_err());
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let toml_str = r#"
[memory]
max_retry_count = 5

[enhancement]
enabled = true
model_id = "claude-haiku-4-5-20250901"
"#;
        let config: EngramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.memory.max_retry_count, 5);
        assert_eq!(config.memory.drain_retry_secs, 15);
        assert!(config.enhancement.enabled);
        assert_eq!(config.enhancement.max_calls_per_window, 10);
    }
}
