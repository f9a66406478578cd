// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./engram.toml` > `~/.config/engram/engram.toml`
//! with environment variable overrides via `ENGRAM_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::EngramConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `~/.config/engram/engram.toml` (user XDG config)
/// 3. `./engram.toml` (local directory)
/// 4. `ENGRAM_*` environment variables
pub fn load_config() -> Result<EngramConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(EngramConfig::default()))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("engram/engram.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("engram.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<EngramConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(EngramConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<EngramConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(EngramConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names. For example, `ENGRAM_MEMORY_MAX_RETRY_COUNT`
/// must map to `memory.max_retry_count`, not `memory.max.retry.count`.
fn env_provider() -> Env {
    Env::prefixed("ENGRAM_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("memory_", "memory.", 1)
            .replacen("embedding_", "embedding.", 1)
            .replacen("enhancement_", "enhancement.", 1)
            .replacen("storage_", "storage.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_str_applies_overrides() {
        let config = load_config_from_str(
            r#"
[memory]
max_retrieval_results = 25

[storage]
database_path = "/tmp/engram-test.db"
"#,
        )
        .unwrap();
        assert_eq!(config.memory.max_retrieval_results, 25);
        assert_eq!(config.storage.database_path, "/tmp/engram-test.db");
        // Untouched sections keep defaults.
        assert_eq!(config.embedding.batch_size, 16);
    }

    #[test]
    fn load_from_str_empty_is_defaults() {
        let config = load_config_from_str("").unwrap();
        assert!(config.memory.enabled);
        assert!(!config.enhancement.enabled);
    }

    #[test]
    fn load_from_str_rejects_unknown_key() {
        let result = load_config_from_str("[memory]\nretry_cont = 3\n");
        assert!(result.is_err());
    }
}
