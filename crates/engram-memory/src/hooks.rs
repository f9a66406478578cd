// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle hooks and the memory service composition root.
//!
//! The surrounding chat lifecycle calls these entry points. Interactive-path
//! work (session rows, prompt persistence, context building) is awaited;
//! indexing, enhancement, and summarization run as supervised background
//! tasks that log failures and never propagate them to the chat turn.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engram_config::model::EngramConfig;
use engram_core::{
    EngramError, InitStatus, LlmBridge, Observation, Prompt, Session, SessionStatus,
};
use engram_storage::queries::{observations, prompts, sessions};
use engram_storage::Database;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedder::EmbeddingPipeline;
use crate::enhancer::Enhancer;
use crate::index::VectorIndex;
use crate::init::{InitManager, ReadinessProbe};
use crate::parser;
use crate::queue::{EmbeddingQueue, ObservationIndexer};
use crate::ranker::{HybridRanker, SearchOptions};
use crate::types::{EmbedderStatus, QueueItem};

/// Arguments for starting a memory session.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub sub_chat_id: String,
    pub project_id: String,
    pub chat_id: String,
}

/// A completed tool call reported by the chat lifecycle.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub tool_name: String,
    pub input: Value,
    pub output: String,
    pub call_id: Option<String>,
}

/// An assistant message reported by the chat lifecycle.
#[derive(Debug, Clone)]
pub struct AssistantEvent {
    pub text: String,
    pub message_id: Option<String>,
}

/// Composition root for the memory engine.
///
/// Construct once per process, call [`MemoryService::start`] to launch
/// background initialization, then feed lifecycle events through the hook
/// methods. All collaborators are owned here; nothing is a global.
pub struct MemoryService {
    db: Database,
    config: EngramConfig,
    pipeline: Arc<EmbeddingPipeline>,
    index: Arc<VectorIndex>,
    init: Arc<InitManager>,
    queue: Arc<EmbeddingQueue>,
    ranker: HybridRanker,
    enhancer: Option<Arc<Enhancer>>,
}

impl MemoryService {
    /// Build the service against the configured database path.
    pub async fn new(
        config: EngramConfig,
        bridge: Option<Arc<dyn LlmBridge>>,
    ) -> Result<Self, EngramError> {
        let db = Database::open(&config.storage.database_path).await?;
        Self::with_database(config, db, bridge)
    }

    /// Build the service on an existing database handle.
    pub fn with_database(
        config: EngramConfig,
        db: Database,
        bridge: Option<Arc<dyn LlmBridge>>,
    ) -> Result<Self, EngramError> {
        let pipeline = Arc::new(EmbeddingPipeline::new(config.embedding.clone()));
        let index = Arc::new(VectorIndex::new(
            db.clone(),
            pipeline.clone(),
            config.memory.clone(),
            PathBuf::from(&config.embedding.data_dir),
        ));
        let init = Arc::new(InitManager::new(index.clone(), pipeline.clone()));
        let sink = Arc::new(ObservationIndexer::new(pipeline.clone(), index.clone()));
        let queue = Arc::new(EmbeddingQueue::new(
            init.clone() as Arc<dyn ReadinessProbe>,
            sink,
            config.memory.clone(),
        ));
        let ranker = HybridRanker::new(db.clone(), index.clone(), config.memory.clone());
        let enhancer = match bridge {
            Some(bridge) if config.enhancement.enabled => {
                Some(Arc::new(Enhancer::new(bridge, config.enhancement.clone())))
            }
            _ => None,
        };

        Ok(Self {
            db,
            config,
            pipeline,
            index,
            init,
            queue,
            ranker,
            enhancer,
        })
    }

    /// Launch background initialization of the embedding/index subsystem.
    /// Does nothing when the memory system is disabled.
    pub fn start(&self) {
        if !self.config.memory.enabled {
            return;
        }
        self.init.spawn_init();
    }

    fn disabled(&self) -> bool {
        !self.config.memory.enabled
    }

    /// Current subsystem readiness.
    pub fn init_status(&self) -> InitStatus {
        self.init.status()
    }

    /// Embedding model download/load status for UI polling.
    pub fn embedder_status(&self) -> EmbedderStatus {
        self.pipeline.status()
    }

    /// The embedding queue, exposed for drain scheduling by the host.
    pub fn queue(&self) -> &Arc<EmbeddingQueue> {
        &self.queue
    }

    /// Start a memory session.
    ///
    /// Any stale active session for the same sub-chat is force-completed
    /// first; failure to do so is logged and does not block the new session.
    /// When memory is disabled, an unpersisted session is returned so callers
    /// keep a handle without any rows being written.
    pub async fn on_session_start(&self, args: SessionStart) -> Result<Session, EngramError> {
        let now = now_ms();
        if self.disabled() {
            return Ok(Session {
                id: Uuid::new_v4().to_string(),
                sub_chat_id: args.sub_chat_id,
                project_id: args.project_id,
                chat_id: args.chat_id,
                status: SessionStatus::Active,
                started_at: now,
                completed_at: None,
                summary: None,
            });
        }
        match sessions::force_complete_stale(&self.db, &args.sub_chat_id, now).await {
            Ok(0) => {}
            Ok(n) => info!(stale = n, sub_chat_id = %args.sub_chat_id, "force-completed stale sessions"),
            Err(e) => warn!(error = %e, "failed to force-complete stale sessions"),
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            sub_chat_id: args.sub_chat_id,
            project_id: args.project_id,
            chat_id: args.chat_id,
            status: SessionStatus::Active,
            started_at: now,
            completed_at: None,
            summary: None,
        };
        sessions::create_session(&self.db, &session).await?;
        debug!(session_id = %session.id, "memory session started");
        Ok(session)
    }

    /// Record a user prompt.
    pub async fn on_user_prompt(&self, session: &Session, text: &str) -> Result<(), EngramError> {
        if self.disabled() {
            return Ok(());
        }
        let prompt = Prompt {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            project_id: session.project_id.clone(),
            text: text.to_string(),
            created_at: now_ms(),
        };
        prompts::insert_prompt(&self.db, &prompt).await
    }

    /// Distill a tool call into an observation, persist it, and queue it for
    /// embedding. Indexing is fire-and-forget; this method returns once the
    /// observation row is durable.
    pub async fn on_tool_output(
        &self,
        session: &Session,
        event: ToolEvent,
    ) -> Result<Option<Observation>, EngramError> {
        if self.disabled() {
            return Ok(None);
        }
        let parsed = parser::parse_tool(
            &session.id,
            &session.project_id,
            &event.tool_name,
            &event.input,
            &event.output,
            event.call_id.as_deref(),
            now_ms(),
        );
        let Some(observation) = parsed else {
            return Ok(None);
        };

        let observation = match &self.enhancer {
            Some(enhancer) => {
                enhancer
                    .enhance_observation(observation, &event.output)
                    .await
            }
            None => observation,
        };

        self.persist_and_enqueue(observation).await
    }

    /// Distill an assistant message into an observation and persist it.
    pub async fn on_assistant_message(
        &self,
        session: &Session,
        event: AssistantEvent,
    ) -> Result<Option<Observation>, EngramError> {
        if self.disabled() {
            return Ok(None);
        }
        let parsed = parser::parse_assistant_text(
            &session.id,
            &session.project_id,
            &event.text,
            event.message_id.as_deref(),
            now_ms(),
        );
        let Some(observation) = parsed else {
            return Ok(None);
        };
        self.persist_and_enqueue(observation).await
    }

    async fn persist_and_enqueue(
        &self,
        observation: Observation,
    ) -> Result<Option<Observation>, EngramError> {
        let inserted = observations::insert_observation(&self.db, &observation).await?;
        if !inserted {
            debug!(id = %observation.id, "duplicate tool call, observation skipped");
            return Ok(None);
        }

        // Observations with no narrative stay in the relational store but
        // are never indexed; the queue also guards against empty text.
        if !observation.narrative.trim().is_empty() {
            let queue = self.queue.clone();
            let item = QueueItem {
                id: observation.id.clone(),
                text: observation.narrative.clone(),
                project_id: observation.project_id.clone(),
                kind: observation.kind,
                created_at: observation.created_at,
                retry_count: 0,
            };
            tokio::spawn(async move {
                queue.enqueue(item).await;
            });
        }
        Ok(Some(observation))
    }

    /// End a session. Summary generation, when configured, runs in the
    /// background and never delays session completion.
    pub async fn on_session_end(&self, session: &Session, failed: bool) -> Result<(), EngramError> {
        if self.disabled() {
            return Ok(());
        }
        let status = if failed {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        sessions::complete_session(&self.db, &session.id, status, now_ms()).await?;

        if let Some(enhancer) = &self.enhancer {
            let enhancer = enhancer.clone();
            let db = self.db.clone();
            let session_id = session.id.clone();
            tokio::spawn(async move {
                if let Err(e) = generate_summary(&db, &enhancer, &session_id).await {
                    warn!(session_id = %session_id, error = %e, "session summary generation failed");
                }
            });
        }
        Ok(())
    }

    /// Build a markdown context block for prompt injection.
    ///
    /// The hybrid search runs under a hard timeout; on timeout, error, or an
    /// empty result the fallback is the most recent observations for the
    /// project, substantive kinds first, backfilled with conversational ones.
    /// Results scoring below the configured relevance floor count as empty,
    /// so a query with no real match still yields recent project context
    /// rather than nothing.
    pub async fn build_memory_context(&self, project_id: &str, query: &str) -> Option<String> {
        if self.disabled() {
            return None;
        }
        let limit = self.config.memory.context_max_results;
        let timeout = Duration::from_millis(self.config.memory.context_timeout_ms);

        let options = SearchOptions {
            project_id: Some(project_id.to_string()),
            kind: None,
            limit,
        };
        let search = tokio::time::timeout(timeout, self.ranker.search(query, &options)).await;

        let relevant: Vec<(String, String, String)> = match search {
            Ok(Ok(results)) => results
                .into_iter()
                .filter(|r| f64::from(r.score) >= self.config.memory.relevance_floor)
                .map(|r| (r.kind.to_string(), r.title, r.excerpt))
                .collect(),
            Ok(Err(e)) => {
                warn!(error = %e, "hybrid search failed, falling back to recency");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "context build timed out, falling back to recency");
                Vec::new()
            }
        };

        let entries = if relevant.is_empty() {
            self.recent_fallback(project_id, limit).await
        } else {
            relevant
        };

        if entries.is_empty() {
            return None;
        }

        let mut block = String::from("## Relevant project memory\n\n");
        for (kind, title, excerpt) in &entries {
            if excerpt.is_empty() {
                block.push_str(&format!("- [{kind}] {title}\n"));
            } else {
                block.push_str(&format!("- [{kind}] {title}: {excerpt}\n"));
            }
        }
        Some(block)
    }

    /// Recency fallback: substantive observations first, conversational ones
    /// only to fill remaining slots.
    async fn recent_fallback(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Vec<(String, String, String)> {
        let mut picked = match observations::recent(&self.db, project_id, limit, true).await {
            Ok(obs) => obs,
            Err(e) => {
                warn!(error = %e, "recency fallback failed");
                return Vec::new();
            }
        };

        if picked.len() < limit {
            if let Ok(all) = observations::recent(&self.db, project_id, limit, false).await {
                for obs in all {
                    if picked.len() >= limit {
                        break;
                    }
                    if obs.kind.is_conversational() && !picked.iter().any(|p| p.id == obs.id) {
                        picked.push(obs);
                    }
                }
            }
        }

        picked
            .into_iter()
            .map(|obs| {
                (
                    obs.kind.to_string(),
                    obs.title,
                    parser::truncate_chars(&obs.narrative, 200),
                )
            })
            .collect()
    }

    /// Hybrid search over this project's memory.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<crate::types::HybridSearchResult>, EngramError> {
        self.ranker.search(query, options).await
    }

    /// Delete one observation and its vector. The vector removal is
    /// best-effort.
    pub async fn delete_observation(&self, id: &str) -> Result<bool, EngramError> {
        let removed = observations::delete_observation(&self.db, id).await?;
        if removed {
            self.index.delete(id).await;
        }
        Ok(removed)
    }

    /// Wipe all memory for a project: observations, prompts, sessions, and
    /// vectors.
    pub async fn clear_project(&self, project_id: &str) -> Result<(), EngramError> {
        let obs = observations::delete_by_project(&self.db, project_id).await?;
        let pr = prompts::delete_by_project(&self.db, project_id).await?;
        let sess = sessions::delete_by_project(&self.db, project_id).await?;
        self.index.delete_by_project(project_id).await;
        info!(project_id = %project_id, observations = obs, prompts = pr, sessions = sess,
            "project memory cleared");
        Ok(())
    }
}

async fn generate_summary(
    db: &Database,
    enhancer: &Enhancer,
    session_id: &str,
) -> Result<(), EngramError> {
    let prompt_rows = prompts::list_by_session(db, session_id).await?;
    let prompt_texts: Vec<String> = prompt_rows.into_iter().map(|p| p.text).collect();

    let session = sessions::get_session(db, session_id)
        .await?
        .ok_or_else(|| EngramError::Internal(format!("session {session_id} not found")))?;
    let recent = observations::recent(db, &session.project_id, 50, false).await?;
    let session_obs: Vec<_> = recent
        .into_iter()
        .filter(|o| o.session_id == session_id)
        .collect();

    if let Some(summary) = enhancer.summarize_session(&prompt_texts, &session_obs).await {
        sessions::update_summary(db, session_id, &summary).await?;
        debug!(session_id = %session_id, "session summary stored");
    }
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
