// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory embedding queue with a two-phase drain.
//!
//! Items buffer here until both the vector index and the embedding pipeline
//! are ready, then drain strictly FIFO, one at a time. A drain lock keeps at
//! most one `add` in flight against the index so write ordering stays
//! deterministic. The queue is transient; it does not survive a restart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use engram_config::model::MemoryConfig;
use engram_core::{EngramError, InitState};
use tracing::{debug, error, warn};

use crate::embedder::EmbeddingPipeline;
use crate::index::VectorIndex;
use crate::init::ReadinessProbe;
use crate::types::{QueueItem, VectorRow};

/// Destination for drained queue items.
#[async_trait]
pub trait VectorSink: Send + Sync {
    async fn index(&self, item: &QueueItem) -> Result<(), EngramError>;
}

/// Default sink: embed the item text and write it to the vector index.
pub struct ObservationIndexer {
    pipeline: Arc<EmbeddingPipeline>,
    index: Arc<VectorIndex>,
}

impl ObservationIndexer {
    pub fn new(pipeline: Arc<EmbeddingPipeline>, index: Arc<VectorIndex>) -> Self {
        Self { pipeline, index }
    }
}

#[async_trait]
impl VectorSink for ObservationIndexer {
    async fn index(&self, item: &QueueItem) -> Result<(), EngramError> {
        let embedding = self.pipeline.embed_passage(&item.text).await?;
        self.index
            .add(VectorRow {
                id: item.id.clone(),
                embedding,
                project_id: item.project_id.clone(),
                kind: item.kind,
                created_at: item.created_at,
            })
            .await
    }
}

/// Buffer of pending embedding jobs.
pub struct EmbeddingQueue {
    items: Mutex<VecDeque<QueueItem>>,
    /// Drain lock; a second concurrent drain attempt is a no-op.
    draining: AtomicBool,
    /// A pending delayed-retry timer, at most one at a time.
    retry_scheduled: AtomicBool,
    probe: Arc<dyn ReadinessProbe>,
    sink: Arc<dyn VectorSink>,
    config: MemoryConfig,
}

impl EmbeddingQueue {
    pub fn new(
        probe: Arc<dyn ReadinessProbe>,
        sink: Arc<dyn VectorSink>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            retry_scheduled: AtomicBool::new(false),
            probe,
            sink,
            config,
        }
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.items.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer an item and attempt a drain.
    ///
    /// Enqueueing an id that is already buffered replaces the pending item
    /// in place (last write wins); combined with replace-on-conflict in the
    /// index this makes enqueue idempotent. Items with empty text never
    /// enter the queue; they cannot be embedded.
    pub async fn enqueue(self: &Arc<Self>, item: QueueItem) {
        if item.text.trim().is_empty() {
            debug!(id = %item.id, "skipping embedding job with empty text");
            return;
        }

        let backlog = {
            let Ok(mut queue) = self.items.lock() else {
                error!("embedding queue lock poisoned, dropping item");
                return;
            };
            match queue.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) => *existing = item,
                None => queue.push_back(item),
            }
            queue.len()
        };

        metrics::gauge!("engram_embedding_queue_depth").set(backlog as f64);
        if backlog > self.config.backlog_warn_threshold {
            warn!(backlog, "embedding queue backlog is growing");
        }

        self.drain().await;
    }

    /// Two-phase drain.
    ///
    /// Phase 1 checks subsystem readiness; a not-yet-ready subsystem leaves
    /// the queue untouched (no retry budget consumed) and schedules one
    /// delayed re-drain. A permanently failed subsystem purges the queue.
    /// Phase 2 processes a snapshot of the backlog strictly in FIFO order;
    /// per-item failures re-enqueue at the tail with an incremented retry
    /// count until the ceiling is exceeded.
    pub async fn drain(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.probe.status().state {
            InitState::Ready => {}
            InitState::Failed => {
                let purged = {
                    let Ok(mut queue) = self.items.lock() else {
                        self.draining.store(false, Ordering::SeqCst);
                        return;
                    };
                    let n = queue.len();
                    queue.clear();
                    n
                };
                if purged > 0 {
                    error!(
                        purged,
                        "embedding subsystem failed permanently, dropping queued items"
                    );
                    metrics::counter!("engram_embedding_items_dropped_total")
                        .increment(purged as u64);
                }
                self.draining.store(false, Ordering::SeqCst);
                return;
            }
            InitState::Initializing | InitState::Retrying => {
                self.draining.store(false, Ordering::SeqCst);
                if !self.is_empty() {
                    self.schedule_retry();
                }
                return;
            }
        }

        // Snapshot length so items re-enqueued by this pass wait for the
        // next drain instead of spinning in a tight failure loop.
        let pass_len = self.len();
        for _ in 0..pass_len {
            let Some(mut item) = self.pop_front() else {
                break;
            };
            match self.sink.index(&item).await {
                Ok(()) => {
                    metrics::counter!("engram_embedding_items_indexed_total").increment(1);
                }
                Err(e) => {
                    item.retry_count += 1;
                    if item.retry_count > self.config.max_retry_count {
                        error!(
                            id = %item.id,
                            retries = item.retry_count,
                            error = %e,
                            "dropping embedding job after exhausting retries"
                        );
                        metrics::counter!("engram_embedding_items_dropped_total").increment(1);
                    } else {
                        debug!(id = %item.id, retry = item.retry_count, error = %e,
                            "embedding job failed, re-enqueueing");
                        self.push_back(item);
                    }
                }
            }
        }

        self.draining.store(false, Ordering::SeqCst);
        if !self.is_empty() {
            self.schedule_retry();
        }
    }

    fn pop_front(&self) -> Option<QueueItem> {
        self.items.lock().ok().and_then(|mut q| q.pop_front())
    }

    fn push_back(&self, item: QueueItem) {
        if let Ok(mut q) = self.items.lock() {
            q.push_back(item);
        }
    }

    /// Schedule one delayed re-drain. A pending timer is never duplicated.
    fn schedule_retry(self: &Arc<Self>) {
        if self.retry_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = self.clone();
        let delay = Duration::from_secs(self.config.drain_retry_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.retry_scheduled.store(false, Ordering::SeqCst);
            queue.drain().await;
        });
    }

    #[cfg(test)]
    pub(crate) fn retry_pending(&self) -> bool {
        self.retry_scheduled.load(Ordering::SeqCst)
    }
}
