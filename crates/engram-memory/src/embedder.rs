// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ONNX embedding pipeline with on-demand model lifecycle.
//!
//! Inference runs locally on CPU via all-MiniLM-L6-v2 (or the configured
//! model), producing 384-dimensional L2-normalized vectors. The model is
//! acquired lazily on first embed call; concurrent callers share a single
//! in-flight initialization. Queries and documents are embedded with
//! distinct textual framings so the model can separate intent from content.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use engram_config::model::EmbeddingConfig;
use engram_core::error::EngramError;
use engram_core::traits::adapter::PluginAdapter;
use engram_core::traits::EmbeddingAdapter;
use engram_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::model_manager::ModelManager;
use crate::parser::truncate_chars;
use crate::types::{EmbedderState, EmbedderStatus};

/// Embedding dimensions for all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Framing prefix for query text.
const QUERY_PREFIX: &str = "query: ";

/// Framing prefix for document text.
const PASSAGE_PREFIX: &str = "passage: ";

/// ONNX-based embedding model using all-MiniLM-L6-v2.
///
/// Loads the quantized INT8 ONNX model and tokenizer from disk.
/// Inference runs on CPU with a single thread; the session is not proven
/// safe for concurrent calls, so it sits behind a Mutex.
pub struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

// Safety: Session is accessed through Mutex which provides synchronization.
// The tokenizer is thread-safe for encoding operations.
unsafe impl Send for OnnxModel {}
unsafe impl Sync for OnnxModel {}

impl OnnxModel {
    /// Creates a model from files on disk. Expects `model.onnx` and
    /// `tokenizer.json` in the same directory.
    pub fn load(model_path: &Path) -> Result<Self, EngramError> {
        let model_dir = model_path
            .parent()
            .ok_or_else(|| EngramError::Embedding("invalid model path".to_string()))?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            EngramError::Embedding(format!(
                "failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let session = Session::builder()
            .map_err(|e| EngramError::Embedding(format!("failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngramError::Embedding(format!("failed to set optimization level: {e}")))?
            .with_intra_threads(1)
            .map_err(|e| EngramError::Embedding(format!("failed to set thread count: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                EngramError::Embedding(format!(
                    "failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Embed a single text string, returning a 384-dim L2-normalized vector.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>, EngramError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngramError::Embedding(format!("tokenization failed: {e}")))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding
            .get_type_ids()
            .iter()
            .map(|&t| t as i64)
            .collect();

        let seq_len = input_ids.len();

        let input_ids_array = Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| EngramError::Embedding(format!("failed to shape input_ids: {e}")))?;
        let attention_mask_array = Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| EngramError::Embedding(format!("failed to shape attention_mask: {e}")))?;
        let token_type_ids_array = Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| EngramError::Embedding(format!("failed to shape token_type_ids: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EngramError::Embedding(format!("session lock poisoned: {e}")))?;

        let input_ids_tensor = TensorRef::from_array_view(&input_ids_array)
            .map_err(|e| EngramError::Embedding(format!("input_ids tensor: {e}")))?;
        let attention_mask_tensor = TensorRef::from_array_view(&attention_mask_array)
            .map_err(|e| EngramError::Embedding(format!("attention_mask tensor: {e}")))?;
        let token_type_ids_tensor = TensorRef::from_array_view(&token_type_ids_array)
            .map_err(|e| EngramError::Embedding(format!("token_type_ids tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            ])
            .map_err(|e| EngramError::Embedding(format!("inference failed: {e}")))?;

        // Output shape is [1, seq_len, 384].
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngramError::Embedding(format!("failed to extract output tensor: {e}")))?;

        let hidden_size = shape[shape.len() - 1] as usize;
        let pooled = mean_pool_with_attention(data, &attention_mask, seq_len, hidden_size);

        Ok(l2_normalize(&pooled))
    }
}

/// Apply attention-masked mean pooling over token embeddings.
fn mean_pool_with_attention(
    embeddings: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for i in 0..seq_len {
        if attention_mask[i] > 0 {
            for j in 0..hidden_size {
                sum[j] += embeddings[i * hidden_size + j];
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut sum {
            *val /= count;
        }
    }

    sum
}

/// L2-normalize a vector.
fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vec.iter().map(|v| v / norm).collect()
    } else {
        vec.to_vec()
    }
}

/// Lazily-initialized embedding pipeline.
///
/// First embed call triggers model download and session load, bounded by the
/// configured initialization timeout. A failed or timed-out attempt leaves
/// the pipeline retryable; the next caller starts a fresh attempt.
pub struct EmbeddingPipeline {
    manager: Arc<ModelManager>,
    config: EmbeddingConfig,
    model: OnceCell<Arc<OnnxModel>>,
    /// Message from the most recent failed init attempt. Cleared when a new
    /// attempt starts; the download manager cannot see session-load failures.
    load_error: Mutex<Option<String>>,
}

impl EmbeddingPipeline {
    pub fn new(config: EmbeddingConfig) -> Self {
        let manager = Arc::new(ModelManager::new(
            std::path::PathBuf::from(&config.data_dir),
            config.model_name.clone(),
        ));
        Self {
            manager,
            config,
            model: OnceCell::new(),
            load_error: Mutex::new(None),
        }
    }

    /// The download manager, exposed for fingerprinting and status queries.
    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    /// Pipeline status for UI polling.
    ///
    /// Covers the whole init path: a failure after a successful download
    /// (corrupt files, session load) reports `Error` here, not the download
    /// manager's last happy state.
    pub fn status(&self) -> EmbedderStatus {
        if self.model.initialized() {
            return EmbedderStatus {
                state: EmbedderState::Ready,
                progress: 100,
                error: None,
            };
        }
        if let Some(message) = self.load_error() {
            return EmbedderStatus {
                state: EmbedderState::Error,
                progress: 0,
                error: Some(message),
            };
        }
        self.manager.status()
    }

    fn load_error(&self) -> Option<String> {
        self.load_error.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_load_error(&self, message: Option<String>) {
        if let Ok(mut guard) = self.load_error.lock() {
            *guard = message;
        }
    }

    /// True once the model is loaded in memory.
    pub fn is_ready(&self) -> bool {
        self.model.initialized()
    }

    /// Acquire the model, initializing it if necessary.
    ///
    /// Concurrent callers during acquisition share one in-flight attempt via
    /// OnceCell; on failure the cell stays empty and a later call retries.
    pub async fn ensure_ready(&self) -> Result<Arc<OnnxModel>, EngramError> {
        let timeout = Duration::from_secs(self.config.init_timeout_secs);
        let result = self
            .model
            .get_or_try_init(|| async {
                self.set_load_error(None);
                tokio::time::timeout(timeout, self.initialize())
                    .await
                    .map_err(|_| {
                        warn!(
                            timeout_secs = self.config.init_timeout_secs,
                            "embedding model initialization timed out"
                        );
                        EngramError::Timeout { duration: timeout }
                    })?
            })
            .await;
        match result {
            Ok(model) => Ok(model.clone()),
            Err(e) => {
                self.set_load_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<Arc<OnnxModel>, EngramError> {
        let model_path = self.manager.ensure_model().await?;
        // Session load is CPU/disk bound; keep it off the async executor.
        let model = tokio::task::spawn_blocking(move || OnnxModel::load(&model_path))
            .await
            .map_err(|e| EngramError::Embedding(format!("model load task failed: {e}")))??;
        Ok(Arc::new(model))
    }

    /// Embed document text.
    pub async fn embed_passage(&self, text: &str) -> Result<Vec<f32>, EngramError> {
        self.embed_with_prefix(PASSAGE_PREFIX, text).await
    }

    /// Embed query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EngramError> {
        self.embed_with_prefix(QUERY_PREFIX, text).await
    }

    async fn embed_with_prefix(&self, prefix: &str, text: &str) -> Result<Vec<f32>, EngramError> {
        let model = self.ensure_ready().await?;
        let framed = format!(
            "{prefix}{}",
            truncate_chars(text, self.config.max_embed_chars)
        );
        tokio::task::spawn_blocking(move || model.embed_text(&framed))
            .await
            .map_err(|e| EngramError::Embedding(format!("embed task failed: {e}")))?
    }

    /// Embed a list of document texts, chunked to bound peak memory.
    ///
    /// Within a chunk items run sequentially; the session is not proven safe
    /// for concurrent calls. The pipeline yields between chunks.
    pub async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngramError> {
        let model = self.ensure_ready().await?;
        let mut results = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let framed: Vec<String> = chunk
                .iter()
                .map(|t| format!("{PASSAGE_PREFIX}{}", truncate_chars(t, self.config.max_embed_chars)))
                .collect();
            let model = model.clone();
            let vectors = tokio::task::spawn_blocking(move || {
                let mut out = Vec::with_capacity(framed.len());
                for text in &framed {
                    out.push(model.embed_text(text)?);
                }
                Ok::<_, EngramError>(out)
            })
            .await
            .map_err(|e| EngramError::Embedding(format!("embed task failed: {e}")))??;
            results.extend(vectors);
        }

        Ok(results)
    }
}

#[async_trait]
impl PluginAdapter for EmbeddingPipeline {
    fn name(&self) -> &str {
        "onnx-embedding-pipeline"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, EngramError> {
        match self.status().state {
            EmbedderState::Ready => Ok(HealthStatus::Healthy),
            EmbedderState::Downloading => {
                Ok(HealthStatus::Degraded("model downloading".to_string()))
            }
            EmbedderState::NotDownloaded => {
                Ok(HealthStatus::Degraded("model not yet acquired".to_string()))
            }
            EmbedderState::Error => Ok(HealthStatus::Unhealthy(
                self.status().error.unwrap_or_else(|| "unknown".to_string()),
            )),
        }
    }

    async fn shutdown(&self) -> Result<(), EngramError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for EmbeddingPipeline {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, EngramError> {
        let embeddings = self.embed_passages(&input.texts).await?;
        Ok(EmbeddingOutput {
            embeddings,
            dimensions: EMBEDDING_DIM,
        })
    }
}
