// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM call bridge trait for observation enhancement and summarization.

use async_trait::async_trait;

use crate::error::EngramError;

/// Opaque bridge to a remote language model.
///
/// The bridge is treated as possibly slow and possibly failing. `Ok(None)`
/// means the provider declined to answer (empty completion); callers must
/// degrade gracefully in both the `None` and `Err` cases.
#[async_trait]
pub trait LlmBridge: Send + Sync + 'static {
    /// Sends a single-shot completion request and returns the response text.
    async fn call(
        &self,
        provider_id: &str,
        model_id: &str,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Result<Option<String>, EngramError>;
}
