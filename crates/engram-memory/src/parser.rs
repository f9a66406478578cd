// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rule-based observation parser.
//!
//! Pure classification: (tool name, input, output) or assistant text goes in,
//! a structured [`Observation`] or `None` comes out. No I/O, no network.
//! Unrecognized or uninformative input yields `None`, never an error.

use engram_core::{Observation, ObservationKind};
use serde_json::Value;
use uuid::Uuid;

/// Tools that never produce observations. Bookkeeping and meta operations
/// carry no project knowledge worth remembering.
const SKIPPED_TOOLS: &[&str] = &[
    "todowrite",
    "todoread",
    "task",
    "exit_plan_mode",
    "notebookread",
    "listmcpresources",
];

/// Tool outputs shorter than this carry too little signal to index.
const MIN_TOOL_OUTPUT_CHARS: usize = 20;

/// Assistant replies shorter than this are chat filler, not knowledge.
const MIN_ASSISTANT_CHARS: usize = 80;

/// Ceiling for stored narrative text.
const MAX_NARRATIVE_CHARS: usize = 4000;

/// Fixed concept vocabulary matched against narrative and input text.
const CONCEPT_VOCABULARY: &[(&str, &[&str])] = &[
    ("testing", &["test", "assert", "spec", "coverage"]),
    ("config", &["config", "settings", "toml", "yaml", "env"]),
    ("database", &["sql", "database", "migration", "query", "schema"]),
    ("error-handling", &["error", "panic", "exception", "failure"]),
    ("api", &["endpoint", "api", "request", "response", "http"]),
    ("build", &["build", "compile", "cargo", "make", "bundle"]),
    ("dependencies", &["dependency", "dependencies", "crate", "package", "import"]),
    ("performance", &["performance", "latency", "slow", "optimize", "cache"]),
    ("security", &["auth", "token", "secret", "credential", "permission"]),
    ("documentation", &["readme", "docs", "documentation", "comment"]),
];

/// Parse a completed tool call into an observation.
///
/// Returns `None` for skipped tools, uninformative output, or input shapes
/// the rules do not recognize as knowledge-bearing.
pub fn parse_tool(
    session_id: &str,
    project_id: &str,
    tool_name: &str,
    input: &Value,
    output: &str,
    call_id: Option<&str>,
    now_ms: i64,
) -> Option<Observation> {
    let normalized = tool_name.to_lowercase();
    if SKIPPED_TOOLS.contains(&normalized.as_str()) {
        return None;
    }
    if output.trim().len() < MIN_TOOL_OUTPUT_CHARS {
        return None;
    }

    let kind = classify_tool(&normalized, input);
    let (files_read, files_modified) = extract_files(&normalized, input, kind);

    let subject = files_read
        .first()
        .or_else(|| files_modified.first())
        .cloned()
        .unwrap_or_else(|| describe_input(input));
    let title = build_title(kind, tool_name, &subject);

    let narrative = truncate_chars(output.trim(), MAX_NARRATIVE_CHARS);
    let haystack = format!("{} {} {}", tool_name, input, narrative).to_lowercase();
    let concepts = match_concepts(&haystack);

    let mut facts = Vec::new();
    for path in files_read.iter().chain(files_modified.iter()) {
        facts.push(format!("touched {path}"));
    }

    Some(Observation {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        project_id: project_id.to_string(),
        kind,
        title,
        subtitle: subject,
        narrative,
        facts,
        concepts,
        files_read,
        files_modified,
        tool_name: Some(tool_name.to_string()),
        tool_call_id: call_id.map(str::to_string),
        created_at: now_ms,
    })
}

/// Parse an assistant message into an observation.
///
/// Short replies are dropped. Classification looks for decision, fix, and
/// refactor language; everything else is a conversation observation.
pub fn parse_assistant_text(
    session_id: &str,
    project_id: &str,
    text: &str,
    message_id: Option<&str>,
    now_ms: i64,
) -> Option<Observation> {
    let trimmed = text.trim();
    if trimmed.len() < MIN_ASSISTANT_CHARS {
        return None;
    }

    let kind = classify_assistant_text(trimmed);
    let narrative = truncate_chars(trimmed, MAX_NARRATIVE_CHARS);
    let title = first_sentence(trimmed, 80);
    let concepts = match_concepts(&narrative.to_lowercase());

    Some(Observation {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        project_id: project_id.to_string(),
        kind,
        title,
        subtitle: String::new(),
        narrative,
        facts: Vec::new(),
        concepts,
        files_read: Vec::new(),
        files_modified: Vec::new(),
        tool_name: None,
        tool_call_id: message_id.map(str::to_string),
        created_at: now_ms,
    })
}

/// Deterministic taxonomy assignment for a tool call.
fn classify_tool(tool_name: &str, input: &Value) -> ObservationKind {
    if tool_name.contains("edit") || tool_name.contains("patch") || tool_name.contains("replace") {
        return ObservationKind::Edit;
    }
    if tool_name.contains("write") || tool_name.contains("create") {
        return ObservationKind::Compose;
    }
    if tool_name.contains("web") || tool_name.contains("fetch") || tool_name.contains("browser") {
        return ObservationKind::Research;
    }
    if tool_name.contains("read")
        || tool_name.contains("grep")
        || tool_name.contains("glob")
        || tool_name.contains("find")
        || tool_name.contains("search")
        || tool_name == "ls"
        || tool_name.contains("cat")
    {
        return ObservationKind::Explore;
    }
    if tool_name.contains("bash") || tool_name.contains("shell") || tool_name.contains("exec") {
        return classify_command(input);
    }
    ObservationKind::Analyze
}

/// Shell commands are classified by what they run, not by the tool name.
fn classify_command(input: &Value) -> ObservationKind {
    let command = input
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    if command.contains("test") || command.contains("lint") || command.contains("clippy") {
        return ObservationKind::Analyze;
    }
    if command.starts_with("git ") || command.starts_with("ls") || command.starts_with("cat") {
        return ObservationKind::Explore;
    }
    if command.contains("mkdir")
        || command.contains("touch")
        || command.contains("mv ")
        || command.contains("cp ")
        || command.contains("install")
    {
        return ObservationKind::Implement;
    }
    ObservationKind::Analyze
}

fn classify_assistant_text(text: &str) -> ObservationKind {
    let lower = text.to_lowercase();
    let decision_markers = ["decided to", "we'll use", "i'll use", "chose", "going with"];
    if decision_markers.iter().any(|m| lower.contains(m)) {
        return ObservationKind::Decision;
    }
    if lower.contains("fixed") || lower.contains("the bug was") || lower.contains("root cause") {
        return ObservationKind::Fix;
    }
    if lower.contains("refactor") {
        return ObservationKind::Refactor;
    }
    if lower.contains("implemented") || lower.contains("added support") {
        return ObservationKind::Implement;
    }
    ObservationKind::Conversation
}

/// Pull file paths out of the tool input. Read-like kinds fill `files_read`;
/// mutating kinds fill `files_modified`.
fn extract_files(
    tool_name: &str,
    input: &Value,
    kind: ObservationKind,
) -> (Vec<String>, Vec<String>) {
    let mut paths = Vec::new();
    for key in ["file_path", "path", "file", "filename", "notebook_path"] {
        if let Some(p) = input.get(key).and_then(Value::as_str) {
            if !p.is_empty() && !paths.contains(&p.to_string()) {
                paths.push(p.to_string());
            }
        }
    }
    if let Some(edits) = input.get("edits").and_then(Value::as_array) {
        for edit in edits {
            if let Some(p) = edit.get("file_path").and_then(Value::as_str) {
                if !paths.contains(&p.to_string()) {
                    paths.push(p.to_string());
                }
            }
        }
    }

    let mutating = matches!(
        kind,
        ObservationKind::Edit | ObservationKind::Compose | ObservationKind::Implement
    ) || tool_name.contains("write");

    if mutating {
        (Vec::new(), paths)
    } else {
        (paths, Vec::new())
    }
}

fn build_title(kind: ObservationKind, tool_name: &str, subject: &str) -> String {
    let verb = match kind {
        ObservationKind::Explore => "Explored",
        ObservationKind::Research => "Researched",
        ObservationKind::Implement => "Implemented",
        ObservationKind::Fix => "Fixed",
        ObservationKind::Refactor => "Refactored",
        ObservationKind::Edit => "Edited",
        ObservationKind::Compose => "Wrote",
        ObservationKind::Analyze => "Analyzed",
        ObservationKind::Decision => "Decided",
        ObservationKind::Conversation => "Discussed",
    };
    if subject.is_empty() {
        format!("{verb} via {tool_name}")
    } else {
        format!("{verb} {subject}")
    }
}

fn describe_input(input: &Value) -> String {
    for key in ["command", "query", "pattern", "url"] {
        if let Some(v) = input.get(key).and_then(Value::as_str) {
            return truncate_chars(v, 80);
        }
    }
    String::new()
}

fn match_concepts(haystack: &str) -> Vec<String> {
    let mut concepts = Vec::new();
    for (concept, keywords) in CONCEPT_VOCABULARY {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            concepts.push((*concept).to_string());
        }
    }
    concepts
}

fn first_sentence(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let sentence = first_line
        .split_terminator(['.', '!', '?'])
        .next()
        .unwrap_or(first_line);
    truncate_chars(sentence.trim(), max_chars)
}

/// Truncate on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn read_tool_yields_explore_with_files_read() {
        let obs = parse_tool(
            "s1",
            "p1",
            "Read",
            &json!({"file_path": "/a.ts"}),
            "export function foo(){}",
            Some("call-1"),
            NOW,
        )
        .unwrap();
        assert_eq!(obs.kind, ObservationKind::Explore);
        assert_eq!(obs.files_read, vec!["/a.ts".to_string()]);
        assert!(obs.files_modified.is_empty());
        assert_eq!(obs.tool_call_id.as_deref(), Some("call-1"));
        assert!(!obs.narrative.is_empty());
    }

    #[test]
    fn edit_tool_yields_edit_with_files_modified() {
        let obs = parse_tool(
            "s1",
            "p1",
            "Edit",
            &json!({"file_path": "src/lib.rs"}),
            "replaced 3 occurrences of the old loader name",
            None,
            NOW,
        )
        .unwrap();
        assert_eq!(obs.kind, ObservationKind::Edit);
        assert_eq!(obs.files_modified, vec!["src/lib.rs".to_string()]);
        assert!(obs.files_read.is_empty());
    }

    #[test]
    fn skip_listed_tool_is_filtered() {
        let result = parse_tool(
            "s1",
            "p1",
            "TodoWrite",
            &json!({"todos": []}),
            "a long enough output that would otherwise pass the length filter",
            None,
            NOW,
        );
        assert!(result.is_none());
    }

    #[test]
    fn short_output_is_filtered() {
        assert!(parse_tool("s1", "p1", "Read", &json!({}), "ok", None, NOW).is_none());
    }

    #[test]
    fn web_fetch_is_research() {
        let obs = parse_tool(
            "s1",
            "p1",
            "WebFetch",
            &json!({"url": "https://docs.rs/ort"}),
            "ort is a Rust binding for ONNX Runtime with session APIs",
            None,
            NOW,
        )
        .unwrap();
        assert_eq!(obs.kind, ObservationKind::Research);
    }

    #[test]
    fn bash_test_command_is_analyze() {
        let obs = parse_tool(
            "s1",
            "p1",
            "Bash",
            &json!({"command": "cargo test -p engram-storage"}),
            "running 12 tests ... test result: ok. 12 passed",
            None,
            NOW,
        )
        .unwrap();
        assert_eq!(obs.kind, ObservationKind::Analyze);
    }

    #[test]
    fn classification_is_deterministic() {
        let input = json!({"file_path": "/x.rs"});
        let a = parse_tool("s1", "p1", "Read", &input, "some file contents here", None, NOW)
            .unwrap();
        let b = parse_tool("s1", "p1", "Read", &input, "some file contents here", None, NOW)
            .unwrap();
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.title, b.title);
        assert_eq!(a.concepts, b.concepts);
    }

    #[test]
    fn assistant_short_reply_is_filtered() {
        assert!(parse_assistant_text("s1", "p1", "Sounds good!", None, NOW).is_none());
    }

    #[test]
    fn assistant_decision_language_is_decision() {
        let text = "After comparing the two approaches I decided to use a single serialized \
                    connection for all writes, because it keeps ordering deterministic.";
        let obs = parse_assistant_text("s1", "p1", text, Some("m1"), NOW).unwrap();
        assert_eq!(obs.kind, ObservationKind::Decision);
        assert_eq!(obs.tool_call_id.as_deref(), Some("m1"));
    }

    #[test]
    fn assistant_default_is_conversation() {
        let text = "Here is a summary of the modules involved and how the data flows between \
                    them during a normal retrieval pass through the system.";
        let obs = parse_assistant_text("s1", "p1", text, None, NOW).unwrap();
        assert_eq!(obs.kind, ObservationKind::Conversation);
    }

    #[test]
    fn concepts_come_from_fixed_vocabulary() {
        let obs = parse_tool(
            "s1",
            "p1",
            "Bash",
            &json!({"command": "cargo test"}),
            "error[E0308]: mismatched types in the config loader test",
            None,
            NOW,
        )
        .unwrap();
        assert!(obs.concepts.contains(&"testing".to_string()));
        assert!(obs.concepts.contains(&"error-handling".to_string()));
    }

    #[test]
    fn narrative_is_truncated() {
        let long_output = "x".repeat(10_000);
        let obs = parse_tool("s1", "p1", "Read", &json!({}), &long_output, None, NOW).unwrap();
        assert_eq!(obs.narrative.chars().count(), MAX_NARRATIVE_CHARS);
    }

    #[test]
    fn multi_edit_collects_all_paths() {
        let obs = parse_tool(
            "s1",
            "p1",
            "MultiEdit",
            &json!({"edits": [
                {"file_path": "src/a.rs"},
                {"file_path": "src/b.rs"},
                {"file_path": "src/a.rs"}
            ]}),
            "applied 3 edits across two files without conflicts",
            None,
            NOW,
        )
        .unwrap();
        assert_eq!(
            obs.files_modified,
            vec!["src/a.rs".to_string(), "src/b.rs".to_string()]
        );
    }
}
