// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde
//! attributes, such as score ranges, non-zero sizes, and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::EngramConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &EngramConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.embedding.data_dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "embedding.data_dir must not be empty".to_string(),
        });
    }

    if config.embedding.batch_size == 0 {
        errors.push(ConfigError::Validation {
            message: "embedding.batch_size must be at least 1".to_string(),
        });
    }

    if config.embedding.max_embed_chars == 0 {
        errors.push(ConfigError::Validation {
            message: "embedding.max_embed_chars must be at least 1".to_string(),
        });
    }

    if config.memory.rrf_k <= 0.0 {
        errors.push(ConfigError::Validation {
            message: format!(
                "memory.rrf_k must be positive, got {}",
                config.memory.rrf_k
            ),
        });
    }

    if !(0.0..=1.0).contains(&config.memory.relevance_floor) {
        errors.push(ConfigError::Validation {
            message: format!(
                "memory.relevance_floor must be within 0.0-1.0, got {}",
                config.memory.relevance_floor
            ),
        });
    }

    if config.memory.max_retrieval_results == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.max_retrieval_results must be at least 1".to_string(),
        });
    }

    if config.memory.context_max_results == 0 {
        errors.push(ConfigError::Validation {
            message: "memory.context_max_results must be at least 1".to_string(),
        });
    }

    if config.enhancement.enabled {
        if config.enhancement.model_id.trim().is_empty() {
            errors.push(ConfigError::Validation {
                message: "enhancement.model_id must not be empty when enhancement is enabled"
                    .to_string(),
            });
        }
        if config.enhancement.window_secs == 0 {
            errors.push(ConfigError::Validation {
                message: "enhancement.window_secs must be at least 1".to_string(),
            });
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = EngramConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = EngramConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("database_path"))
        ));
    }

    #[test]
    fn out_of_range_relevance_floor_fails() {
        let mut config = EngramConfig::default();
        config.memory.relevance_floor = 1.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("relevance_floor"))
        ));
    }

    #[test]
    fn zero_batch_size_fails() {
        let mut config = EngramConfig::default();
        config.embedding.batch_size = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("batch_size"))
        ));
    }

    #[test]
    fn enhancement_constraints_only_when_enabled() {
        let mut config = EngramConfig::default();
        config.enhancement.model_id = "".to_string();
        // Disabled: empty model id is fine.
        assert!(validate_config(&config).is_ok());

        config.enhancement.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("model_id"))
        ));
    }
}
