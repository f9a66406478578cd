// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional LLM-based observation enhancement and session summarization.
//!
//! Enhancement upgrades a rule-based observation with a small model call,
//! gated by a tool skip-list, a minimum output length, and a sliding-window
//! rate limiter. Every failure path falls back to the rule-based observation;
//! enhancement is strictly additive. Responses are parsed with tolerant tag
//! extraction, not strict schema validation.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use engram_config::model::EnhancementConfig;
use engram_core::{LlmBridge, Observation, ObservationKind, SessionSummary};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::parser::truncate_chars;

/// Routine tools whose output is never worth an LLM call.
const ENHANCEMENT_SKIP_TOOLS: &[&str] = &["ls", "glob", "todowrite", "todoread"];

/// Character ceiling for tool output included in the enhancement prompt.
const MAX_PROMPT_OUTPUT_CHARS: usize = 3_000;

/// Character ceiling for observation text included in the summary prompt.
const MAX_SUMMARY_ITEM_CHARS: usize = 300;

const ENHANCE_SYSTEM_PROMPT: &str = "You distill coding-agent activity into concise memory records. \
Given a tool call and its output, respond with exactly these tags:\n\
<type>one of: explore, research, implement, fix, refactor, edit, compose, analyze, decision, conversation</type>\n\
<title>short headline</title>\n\
<narrative>2-4 sentence account of what happened and what was learned</narrative>\n\
<concepts>comma-separated tags</concepts>\n\
No other text.";

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize a coding-agent session. \
Respond with exactly these tags:\n\
<request>what the user asked for</request>\n\
<investigated>what was examined</investigated>\n\
<learned>what was learned</learned>\n\
<completed>what was completed</completed>\n\
<next_steps>what remains</next_steps>\n\
No other text.";

/// Sliding-window rate limiter.
///
/// Grants at most `max_calls` within any trailing `window`. A denied attempt
/// is a skip, not a wait; callers never block on the limiter.
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    timestamps: Mutex<Vec<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Consume one unit of budget if any remains.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let Ok(mut timestamps) = self.timestamps.lock() else {
            return false;
        };
        timestamps.retain(|t| now.duration_since(*t) < self.window);
        if timestamps.len() < self.max_calls {
            timestamps.push(now);
            true
        } else {
            false
        }
    }
}

/// Upgrades observations and synthesizes session summaries via the LLM bridge.
pub struct Enhancer {
    bridge: Arc<dyn LlmBridge>,
    config: EnhancementConfig,
    limiter: SlidingWindowLimiter,
}

impl Enhancer {
    pub fn new(bridge: Arc<dyn LlmBridge>, config: EnhancementConfig) -> Self {
        let limiter = SlidingWindowLimiter::new(
            config.max_calls_per_window,
            Duration::from_secs(config.window_secs),
        );
        Self {
            bridge,
            config,
            limiter,
        }
    }

    /// Enhance a rule-based observation, returning the input unchanged when
    /// any gate fails or the call/parse fails.
    ///
    /// Gates: enhancement enabled, tool not on the skip-list, raw output
    /// long enough to justify a call, and rate-limit budget remaining.
    pub async fn enhance_observation(&self, observation: Observation, raw_output: &str) -> Observation {
        if !self.config.enabled {
            return observation;
        }
        if let Some(tool) = &observation.tool_name {
            if ENHANCEMENT_SKIP_TOOLS.contains(&tool.to_lowercase().as_str()) {
                return observation;
            }
        }
        if raw_output.len() < self.config.min_output_chars {
            return observation;
        }
        if !self.limiter.try_acquire() {
            debug!(id = %observation.id, "enhancement rate limit reached, keeping rule-based observation");
            return observation;
        }

        metrics::counter!("engram_enhancement_calls_total").increment(1);
        let user_message = format!(
            "Tool: {}\nRule-based title: {}\nOutput:\n{}",
            observation.tool_name.as_deref().unwrap_or("none"),
            observation.title,
            truncate_chars(raw_output, MAX_PROMPT_OUTPUT_CHARS),
        );

        let response = self
            .bridge
            .call(
                &self.config.provider_id,
                &self.config.model_id,
                ENHANCE_SYSTEM_PROMPT,
                &user_message,
                self.config.max_tokens,
            )
            .await;

        match response {
            Ok(Some(text)) => merge_enhancement(observation, &text),
            Ok(None) => observation,
            Err(e) => {
                warn!(error = %e, "enhancement call failed, keeping rule-based observation");
                observation
            }
        }
    }

    /// Generate a five-field session summary from its observations and
    /// prompts. Absent tags yield empty strings; a failed call yields `None`.
    pub async fn summarize_session(
        &self,
        prompts: &[String],
        observations: &[Observation],
    ) -> Option<SessionSummary> {
        if !self.config.enabled {
            return None;
        }
        if !self.limiter.try_acquire() {
            debug!("summary rate limit reached, skipping session summary");
            return None;
        }

        metrics::counter!("engram_enhancement_calls_total").increment(1);
        let mut user_message = String::from("User prompts:\n");
        for prompt in prompts {
            user_message.push_str(&format!("- {}\n", truncate_chars(prompt, MAX_SUMMARY_ITEM_CHARS)));
        }
        user_message.push_str("\nObservations:\n");
        for obs in observations {
            user_message.push_str(&format!(
                "- [{}] {}: {}\n",
                obs.kind,
                obs.title,
                truncate_chars(&obs.narrative, MAX_SUMMARY_ITEM_CHARS)
            ));
        }

        let response = self
            .bridge
            .call(
                &self.config.provider_id,
                &self.config.model_id,
                SUMMARY_SYSTEM_PROMPT,
                &user_message,
                self.config.max_tokens,
            )
            .await;

        match response {
            Ok(Some(text)) => Some(parse_summary(&text)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "session summary call failed");
                None
            }
        }
    }
}

/// Merge an enhancement response into the rule-based observation.
///
/// Type, title, narrative, and concepts may be replaced; file-path facts and
/// file lists from the rule-based pass always survive. Absent or unparseable
/// fields keep their rule-based values.
fn merge_enhancement(mut observation: Observation, response: &str) -> Observation {
    if let Some(kind) = extract_tag(response, "type")
        .and_then(|t| ObservationKind::from_str(t.trim()).ok())
    {
        observation.kind = kind;
    }
    if let Some(title) = extract_tag(response, "title").filter(|t| !t.trim().is_empty()) {
        observation.title = title.trim().to_string();
    }
    if let Some(narrative) = extract_tag(response, "narrative").filter(|t| !t.trim().is_empty()) {
        observation.narrative = narrative.trim().to_string();
    }
    if let Some(concepts) = extract_tag(response, "concepts") {
        let parsed: Vec<String> = concepts
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if !parsed.is_empty() {
            observation.concepts = parsed;
        }
    }
    observation
}

fn parse_summary(response: &str) -> SessionSummary {
    let field = |tag: &str| {
        extract_tag(response, tag)
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    };
    SessionSummary {
        request: field("request"),
        investigated: field("investigated"),
        learned: field("learned"),
        completed: field("completed"),
        next_steps: field("next_steps"),
    }
}

/// Tolerant tag extraction: the text between `<tag>` and `</tag>`, or `None`.
fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engram_core::EngramError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockBridge {
        calls: AtomicUsize,
        response: Option<String>,
        fail: bool,
    }

    impl MockBridge {
        fn returning(response: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: Some(response.to_string()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: None,
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmBridge for MockBridge {
        async fn call(
            &self,
            _provider_id: &str,
            _model_id: &str,
            _system_prompt: &str,
            _user_message: &str,
            _max_tokens: u32,
        ) -> Result<Option<String>, EngramError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EngramError::Provider {
                    message: "simulated".to_string(),
                    source: None,
                })
            } else {
                Ok(self.response.clone())
            }
        }
    }

    fn observation() -> Observation {
        Observation {
            id: "o1".to_string(),
            session_id: "s1".to_string(),
            project_id: "p1".to_string(),
            kind: ObservationKind::Explore,
            title: "Explored src/queue.rs".to_string(),
            subtitle: String::new(),
            narrative: "read the queue module".to_string(),
            facts: vec!["touched src/queue.rs".to_string()],
            concepts: vec![],
            files_read: vec!["src/queue.rs".to_string()],
            files_modified: vec![],
            tool_name: Some("Read".to_string()),
            tool_call_id: Some("c1".to_string()),
            created_at: 1_700_000_000_000,
        }
    }

    fn config(enabled: bool, budget: usize) -> EnhancementConfig {
        EnhancementConfig {
            enabled,
            max_calls_per_window: budget,
            min_output_chars: 10,
            ..Default::default()
        }
    }

    #[test]
    fn extract_tag_basic() {
        assert_eq!(extract_tag("<title>Hello</title>", "title"), Some("Hello"));
        assert_eq!(extract_tag("no tags here", "title"), None);
        assert_eq!(extract_tag("<title>unclosed", "title"), None);
    }

    #[test]
    fn merge_replaces_type_title_narrative_concepts() {
        let response = "<type>fix</type><title>Fixed the drain race</title>\
            <narrative>Traced a race in the drain lock and fixed it.</narrative>\
            <concepts>queue, concurrency</concepts>";
        let merged = merge_enhancement(observation(), response);
        assert_eq!(merged.kind, ObservationKind::Fix);
        assert_eq!(merged.title, "Fixed the drain race");
        assert_eq!(merged.concepts, vec!["queue".to_string(), "concurrency".to_string()]);
        // File facts from the rule-based pass survive.
        assert_eq!(merged.facts, vec!["touched src/queue.rs".to_string()]);
        assert_eq!(merged.files_read, vec!["src/queue.rs".to_string()]);
    }

    #[test]
    fn merge_keeps_rule_based_values_for_absent_fields() {
        let original = observation();
        let merged = merge_enhancement(original.clone(), "<title>Better title</title>");
        assert_eq!(merged.title, "Better title");
        assert_eq!(merged.kind, original.kind);
        assert_eq!(merged.narrative, original.narrative);
    }

    #[test]
    fn merge_ignores_invalid_type() {
        let merged = merge_enhancement(observation(), "<type>banana</type>");
        assert_eq!(merged.kind, ObservationKind::Explore);
    }

    #[test]
    fn parse_summary_fills_missing_fields_with_empty() {
        let summary = parse_summary("<request>add retries</request><learned>drain is FIFO</learned>");
        assert_eq!(summary.request, "add retries");
        assert_eq!(summary.learned, "drain is FIFO");
        assert_eq!(summary.investigated, "");
        assert_eq!(summary.completed, "");
        assert_eq!(summary.next_steps, "");
    }

    #[tokio::test]
    async fn zero_budget_returns_input_without_calling() {
        let bridge = Arc::new(MockBridge::returning("<title>x</title>"));
        let enhancer = Enhancer::new(bridge.clone(), config(true, 0));

        let original = observation();
        let result = enhancer
            .enhance_observation(original.clone(), &"y".repeat(500))
            .await;

        assert_eq!(result.title, original.title);
        assert_eq!(bridge.calls(), 0, "no external call on empty budget");
    }

    #[tokio::test]
    async fn disabled_enhancement_never_calls() {
        let bridge = Arc::new(MockBridge::returning("<title>x</title>"));
        let enhancer = Enhancer::new(bridge.clone(), config(false, 10));
        enhancer
            .enhance_observation(observation(), &"y".repeat(500))
            .await;
        assert_eq!(bridge.calls(), 0);
    }

    #[tokio::test]
    async fn skip_listed_tool_never_calls() {
        let bridge = Arc::new(MockBridge::returning("<title>x</title>"));
        let enhancer = Enhancer::new(bridge.clone(), config(true, 10));
        let mut obs = observation();
        obs.tool_name = Some("ls".to_string());
        enhancer.enhance_observation(obs, &"y".repeat(500)).await;
        assert_eq!(bridge.calls(), 0);
    }

    #[tokio::test]
    async fn short_output_never_calls() {
        let bridge = Arc::new(MockBridge::returning("<title>x</title>"));
        let enhancer = Enhancer::new(bridge.clone(), config(true, 10));
        enhancer.enhance_observation(observation(), "tiny").await;
        assert_eq!(bridge.calls(), 0);
    }

    #[tokio::test]
    async fn bridge_failure_falls_back_to_rule_based() {
        let bridge = Arc::new(MockBridge::failing());
        let enhancer = Enhancer::new(bridge.clone(), config(true, 10));
        let original = observation();
        let result = enhancer
            .enhance_observation(original.clone(), &"y".repeat(500))
            .await;
        assert_eq!(result.title, original.title);
        assert_eq!(result.kind, original.kind);
        assert_eq!(bridge.calls(), 1);
    }

    #[tokio::test]
    async fn successful_enhancement_is_merged() {
        let bridge = Arc::new(MockBridge::returning(
            "<type>decision</type><title>Chose RRF fusion</title>",
        ));
        let enhancer = Enhancer::new(bridge, config(true, 10));
        let result = enhancer
            .enhance_observation(observation(), &"y".repeat(500))
            .await;
        assert_eq!(result.kind, ObservationKind::Decision);
        assert_eq!(result.title, "Chose RRF fusion");
    }

    #[tokio::test]
    async fn summarize_parses_all_fields() {
        let bridge = Arc::new(MockBridge::returning(
            "<request>r</request><investigated>i</investigated><learned>l</learned>\
             <completed>c</completed><next_steps>n</next_steps>",
        ));
        let enhancer = Enhancer::new(bridge, config(true, 10));
        let summary = enhancer
            .summarize_session(&["prompt".to_string()], &[observation()])
            .await
            .unwrap();
        assert_eq!(summary.request, "r");
        assert_eq!(summary.next_steps, "n");
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire(), "budget exhausted");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_acquire(), "budget recovers after the window");
    }
}
