// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the storage layer.
//!
//! The domain types live in `engram-core` so that the memory engine and the
//! storage layer share them without a circular dependency. They are
//! re-exported here for convenience.

pub use engram_core::types::{
    Observation, ObservationKind, Prompt, Session, SessionStatus, SessionSummary,
};

/// Serialize a string list into the JSON TEXT column representation.
pub(crate) fn list_to_json(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a JSON TEXT column back into a string list.
///
/// Malformed stored JSON yields an empty list rather than a hard error so a
/// single corrupt row cannot poison retrieval.
pub(crate) fn list_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_round_trips() {
        let items = vec!["src/main.rs".to_string(), "src/lib.rs".to_string()];
        let json = list_to_json(&items);
        assert_eq!(list_from_json(&json), items);
    }

    #[test]
    fn malformed_list_yields_empty() {
        assert!(list_from_json("not json").is_empty());
        assert!(list_from_json("").is_empty());
    }
}
