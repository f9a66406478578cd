// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model download manager for first-run ONNX embedding model setup.
//!
//! Downloads the configured sentence-transformer ONNX model from HuggingFace
//! on first use and caches it in the data directory. Download progress is
//! observable for UI polling; the model file dominates total size so its
//! progress approximates overall progress.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use engram_core::EngramError;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::types::{EmbedderState, EmbedderStatus};

/// URLs for model files on HuggingFace, parameterized by model name.
fn model_url(model_name: &str) -> String {
    format!(
        "https://huggingface.co/onnx-community/{model_name}-ONNX/resolve/main/onnx/model_quantized.onnx"
    )
}

fn tokenizer_url(model_name: &str) -> String {
    format!(
        "https://huggingface.co/sentence-transformers/{model_name}/resolve/main/tokenizer.json"
    )
}

/// Manages ONNX model download, path resolution, and download status.
pub struct ModelManager {
    data_dir: PathBuf,
    model_name: String,
    status: Mutex<EmbedderStatus>,
}

impl ModelManager {
    /// Creates a new ModelManager for the given data directory and model.
    pub fn new(data_dir: PathBuf, model_name: String) -> Self {
        Self {
            data_dir,
            model_name,
            status: Mutex::new(EmbedderStatus::not_downloaded()),
        }
    }

    /// Name of the configured embedding model.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Directory where model files are stored.
    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join("models").join(&self.model_name)
    }

    /// Path to the ONNX model file.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir().join("model.onnx")
    }

    /// Path to the tokenizer.json file.
    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir().join("tokenizer.json")
    }

    /// Returns true if both model and tokenizer files exist.
    pub fn is_model_available(&self) -> bool {
        self.model_path().exists() && self.tokenizer_path().exists()
    }

    /// Current download status snapshot.
    pub fn status(&self) -> EmbedderStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| EmbedderStatus {
                state: EmbedderState::Error,
                progress: 0,
                error: Some("status lock poisoned".to_string()),
            })
    }

    fn set_status(&self, state: EmbedderState, progress: u8, error: Option<String>) {
        if let Ok(mut status) = self.status.lock() {
            *status = EmbedderStatus {
                state,
                progress,
                error,
            };
        }
    }

    /// Ensures the model is downloaded and available.
    ///
    /// Downloads from HuggingFace on first run; subsequent calls are no-ops.
    /// The embedding pipeline serializes callers, so this never races with
    /// itself.
    pub async fn ensure_model(&self) -> Result<PathBuf, EngramError> {
        if self.is_model_available() {
            self.set_status(EmbedderState::Ready, 100, None);
            return Ok(self.model_path());
        }

        info!(model = %self.model_name, "embedding model not found, downloading");
        self.set_status(EmbedderState::Downloading, 0, None);

        let model_dir = self.model_dir();
        tokio::fs::create_dir_all(&model_dir).await.map_err(|e| {
            EngramError::Embedding(format!("failed to create model directory: {e}"))
        })?;

        // The ONNX model dominates total download size, so only it drives
        // the progress figure. The tokenizer download is a rounding error.
        let files = [
            ("model.onnx", model_url(&self.model_name), true),
            ("tokenizer.json", tokenizer_url(&self.model_name), false),
        ];

        for (filename, url, tracked) in &files {
            let dest = model_dir.join(filename);
            if dest.exists() {
                continue;
            }

            info!(file = %filename, "downloading model file");
            match self.download_file(url, &dest, *tracked).await {
                Ok(size) => {
                    info!(file = %filename, bytes = size, "download complete");
                }
                Err(e) => {
                    self.set_status(EmbedderState::Error, 0, Some(e.to_string()));
                    return Err(e);
                }
            }
        }

        self.set_status(EmbedderState::Ready, 100, None);
        info!(dir = %model_dir.display(), "embedding model ready");
        Ok(self.model_path())
    }

    /// Download `url` into `dest` via a `.partial` sibling renamed into place
    /// on verified completion.
    ///
    /// The final path only ever holds a complete file, so a cancelled or
    /// failed download can never be mistaken for a finished one by the
    /// `dest.exists()` check on the next attempt. Stale `.partial` files are
    /// simply overwritten.
    async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        tracked: bool,
    ) -> Result<u64, EngramError> {
        let mut response = reqwest::get(url)
            .await
            .map_err(|e| EngramError::Embedding(format!("failed to download {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(EngramError::Embedding(format!(
                "download failed with status {}: {url}",
                response.status()
            )));
        }

        let partial = partial_path(dest);
        let total = response.content_length();
        let result = async {
            let mut file = tokio::fs::File::create(&partial).await.map_err(|e| {
                EngramError::Embedding(format!("failed to create {}: {e}", partial.display()))
            })?;

            let mut written: u64 = 0;
            while let Some(chunk) = response.chunk().await.map_err(|e| {
                EngramError::Embedding(format!("failed to read body from {url}: {e}"))
            })? {
                file.write_all(&chunk).await.map_err(|e| {
                    EngramError::Embedding(format!("failed to write {}: {e}", partial.display()))
                })?;
                written += chunk.len() as u64;

                if tracked {
                    if let Some(total) = total.filter(|t| *t > 0) {
                        let pct = ((written * 100) / total).min(99) as u8;
                        self.set_status(EmbedderState::Downloading, pct, None);
                    }
                }
            }

            file.flush().await.map_err(|e| {
                EngramError::Embedding(format!("failed to flush {}: {e}", partial.display()))
            })?;

            if let Some(total) = total.filter(|t| *t > 0) {
                if written != total {
                    return Err(EngramError::Embedding(format!(
                        "truncated download of {url}: got {written} of {total} bytes"
                    )));
                }
            }
            Ok(written)
        }
        .await;

        match result {
            Ok(written) => {
                tokio::fs::rename(&partial, dest).await.map_err(|e| {
                    EngramError::Embedding(format!("failed to finalize {}: {e}", dest.display()))
                })?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

/// Sibling path used while a file is downloading.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &str) -> ModelManager {
        ModelManager::new(PathBuf::from(dir), "all-MiniLM-L6-v2".to_string())
    }

    #[test]
    fn model_path_under_data_dir() {
        let mgr = manager("/tmp/engram");
        assert_eq!(
            mgr.model_path(),
            PathBuf::from("/tmp/engram/models/all-MiniLM-L6-v2/model.onnx")
        );
    }

    #[test]
    fn tokenizer_path_under_data_dir() {
        let mgr = manager("/tmp/engram");
        assert_eq!(
            mgr.tokenizer_path(),
            PathBuf::from("/tmp/engram/models/all-MiniLM-L6-v2/tokenizer.json")
        );
    }

    #[test]
    fn model_not_available_when_missing() {
        let mgr = manager("/nonexistent/path");
        assert!(!mgr.is_model_available());
    }

    #[test]
    fn initial_status_is_not_downloaded() {
        let mgr = manager("/tmp/engram");
        let status = mgr.status();
        assert_eq!(status.state, EmbedderState::NotDownloaded);
        assert_eq!(status.progress, 0);
        assert!(status.error.is_none());
    }

    #[test]
    fn urls_are_parameterized_by_model_name() {
        assert!(model_url("all-MiniLM-L6-v2").contains("all-MiniLM-L6-v2-ONNX"));
        assert!(tokenizer_url("all-MiniLM-L6-v2").contains("sentence-transformers"));
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/m/model.onnx")),
            PathBuf::from("/tmp/m/model.onnx.partial")
        );
    }

    #[tokio::test]
    async fn interrupted_download_leftover_is_not_treated_as_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ModelManager::new(dir.path().to_path_buf(), "all-MiniLM-L6-v2".to_string());
        tokio::fs::create_dir_all(mgr.model_dir()).await.unwrap();
        // Simulates a download killed mid-stream: only the .partial sibling
        // exists, never the final path.
        tokio::fs::write(partial_path(&mgr.model_path()), b"trunc")
            .await
            .unwrap();
        tokio::fs::write(mgr.tokenizer_path(), b"{}").await.unwrap();
        assert!(!mgr.is_model_available());
    }

    #[tokio::test]
    async fn complete_files_are_ready_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ModelManager::new(dir.path().to_path_buf(), "all-MiniLM-L6-v2".to_string());
        tokio::fs::create_dir_all(mgr.model_dir()).await.unwrap();
        tokio::fs::write(mgr.model_path(), b"onnx-bytes").await.unwrap();
        tokio::fs::write(mgr.tokenizer_path(), b"{}").await.unwrap();

        let path = mgr.ensure_model().await.unwrap();
        assert_eq!(path, mgr.model_path());
        assert_eq!(mgr.status().state, EmbedderState::Ready);
    }
}
