// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Initialization manager for the embedding/index subsystem.
//!
//! Tracks one state machine across both independently-initializing parts
//! (vector index, embedding pipeline): initializing -> ready, with retrying
//! in between attempts and failed once the attempt budget is exhausted. The
//! embedding queue reads this state to decide whether a drain is worthwhile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engram_core::{EngramError, InitState, InitStatus};
use tracing::{error, info, warn};

use crate::embedder::EmbeddingPipeline;
use crate::index::VectorIndex;

/// Attempts before the subsystem is declared permanently failed.
const MAX_INIT_ATTEMPTS: u32 = 5;

/// Delay between initialization attempts.
const INIT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Read-only view of subsystem readiness.
pub trait ReadinessProbe: Send + Sync {
    fn status(&self) -> InitStatus;
}

/// Drives initialization of the vector index and embedding pipeline.
pub struct InitManager {
    index: Arc<VectorIndex>,
    pipeline: Arc<EmbeddingPipeline>,
    state: Mutex<InitStatus>,
    started: AtomicBool,
}

impl InitManager {
    pub fn new(index: Arc<VectorIndex>, pipeline: Arc<EmbeddingPipeline>) -> Self {
        Self {
            index,
            pipeline,
            state: Mutex::new(InitStatus {
                state: InitState::Initializing,
                next_retry_at_ms: None,
            }),
            started: AtomicBool::new(false),
        }
    }

    fn set_state(&self, status: InitStatus) {
        if let Ok(mut state) = self.state.lock() {
            *state = status;
        }
    }

    /// Launch the background initialization loop. Idempotent; only the first
    /// call spawns the task.
    pub fn spawn_init(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_init_loop().await;
        });
    }

    async fn run_init_loop(&self) {
        for attempt in 1..=MAX_INIT_ATTEMPTS {
            match self.try_init_once().await {
                Ok(()) => {
                    info!(attempt, "memory subsystem ready");
                    self.set_state(InitStatus {
                        state: InitState::Ready,
                        next_retry_at_ms: None,
                    });
                    return;
                }
                Err(e) if attempt < MAX_INIT_ATTEMPTS => {
                    let next_retry_at_ms =
                        chrono::Utc::now().timestamp_millis() + INIT_RETRY_DELAY.as_millis() as i64;
                    warn!(attempt, error = %e, "memory subsystem init failed, will retry");
                    self.set_state(InitStatus {
                        state: InitState::Retrying,
                        next_retry_at_ms: Some(next_retry_at_ms),
                    });
                    tokio::time::sleep(INIT_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "memory subsystem init failed permanently");
                    self.set_state(InitStatus {
                        state: InitState::Failed,
                        next_retry_at_ms: None,
                    });
                    metrics::counter!("engram_init_failures_total").increment(1);
                    return;
                }
            }
        }
    }

    async fn try_init_once(&self) -> Result<(), EngramError> {
        self.index.init().await?;
        self.pipeline.ensure_ready().await?;
        Ok(())
    }
}

impl ReadinessProbe for InitManager {
    fn status(&self) -> InitStatus {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(InitStatus {
                state: InitState::Failed,
                next_retry_at_ms: None,
            })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A probe whose state tests can flip at will.
    pub struct StaticProbe {
        pub state: Mutex<InitStatus>,
    }

    impl StaticProbe {
        pub fn new(state: InitState) -> Self {
            Self {
                state: Mutex::new(InitStatus {
                    state,
                    next_retry_at_ms: None,
                }),
            }
        }

        pub fn set(&self, state: InitState) {
            if let Ok(mut s) = self.state.lock() {
                s.state = state;
            }
        }
    }

    impl ReadinessProbe for StaticProbe {
        fn status(&self) -> InitStatus {
            self.state
                .lock()
                .map(|s| *s)
                .unwrap_or(InitStatus {
                    state: InitState::Failed,
                    next_retry_at_ms: None,
                })
        }
    }
}
