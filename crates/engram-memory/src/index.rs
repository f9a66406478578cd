// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted vector index with model-migration handling.
//!
//! Vectors are stored as little-endian f32 BLOBs in the shared SQLite
//! database, partitioned by project id at query time. On initialization a
//! fingerprint of the configured embedding model is compared against a
//! fingerprint file on disk; a mismatch means every stored vector was built
//! by a geometrically incompatible model, so the table is wiped. Re-embedding
//! is the caller's responsibility.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use engram_config::model::MemoryConfig;
use engram_core::{EngramError, ObservationKind};
use engram_storage::{Database, map_tr_err};
use rusqlite::params;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::embedder::EmbeddingPipeline;
use crate::types::{cosine_similarity, VectorRow};

/// Over-fetch multiplier: candidates requested before project/kind filtering.
const CANDIDATE_MULTIPLIER: usize = 3;

/// Filters applied to a vector search.
#[derive(Debug, Clone, Default)]
pub struct VectorSearchOptions {
    pub project_id: Option<String>,
    pub kind: Option<ObservationKind>,
    pub limit: usize,
}

/// A vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub kind: ObservationKind,
    /// Cosine similarity, higher is better.
    pub score: f32,
}

/// Durable store of embedding vectors keyed by observation id.
pub struct VectorIndex {
    db: Database,
    pipeline: Arc<EmbeddingPipeline>,
    config: MemoryConfig,
    fingerprint_path: PathBuf,
    init: OnceCell<()>,
}

impl VectorIndex {
    pub fn new(
        db: Database,
        pipeline: Arc<EmbeddingPipeline>,
        config: MemoryConfig,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            pipeline,
            config,
            fingerprint_path: data_dir.join("vector.fingerprint"),
            init: OnceCell::new(),
        }
    }

    /// Initialize the index: create the table and run the model-migration
    /// check. Idempotent and memoized; concurrent callers share one attempt.
    /// A failed attempt leaves the index retryable.
    pub async fn init(&self) -> Result<(), EngramError> {
        self.init
            .get_or_try_init(|| async {
                self.create_table().await?;
                self.check_model_migration().await?;
                Ok::<_, EngramError>(())
            })
            .await?;
        Ok(())
    }

    /// True once initialization has completed.
    pub fn is_ready(&self) -> bool {
        self.init.initialized()
    }

    async fn create_table(&self) -> Result<(), EngramError> {
        self.db
            .connection()
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS vectors (
                         id TEXT PRIMARY KEY NOT NULL,
                         embedding BLOB NOT NULL,
                         project_id TEXT NOT NULL,
                         kind TEXT NOT NULL,
                         created_at INTEGER NOT NULL
                     );
                     CREATE INDEX IF NOT EXISTS idx_vectors_project ON vectors(project_id);",
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Compare the configured model's fingerprint against the one recorded on
    /// disk. On mismatch the table is wiped; old vectors cannot be compared
    /// against new-model query vectors.
    async fn check_model_migration(&self) -> Result<(), EngramError> {
        let current = model_fingerprint(
            self.pipeline.manager().model_name(),
            crate::embedder::EMBEDDING_DIM,
        );
        let stored = tokio::fs::read_to_string(&self.fingerprint_path)
            .await
            .ok()
            .map(|s| s.trim().to_string());

        if stored.as_deref() == Some(current.as_str()) {
            return Ok(());
        }

        if let Some(stored) = &stored {
            info!(
                old = %stored,
                new = %current,
                "embedding model changed, rebuilding vector index"
            );
            let dropped = self
                .db
                .connection()
                .call(|conn| {
                    let n = conn.execute("DELETE FROM vectors", [])?;
                    Ok(n)
                })
                .await
                .map_err(map_tr_err)?;
            info!(dropped, "stale vectors removed");
            metrics::counter!("engram_vector_migrations_total").increment(1);
        }

        if let Some(parent) = self.fingerprint_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngramError::Internal(format!("failed to create data dir: {e}"))
            })?;
        }
        tokio::fs::write(&self.fingerprint_path, &current)
            .await
            .map_err(|e| EngramError::Internal(format!("failed to write fingerprint: {e}")))?;
        Ok(())
    }

    /// Insert or replace a vector row. Replaces on id conflict so a
    /// re-enqueued observation converges to a single row.
    pub async fn add(&self, row: VectorRow) -> Result<(), EngramError> {
        self.init().await?;
        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO vectors (id, embedding, project_id, kind, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id,
                        vec_to_blob(&row.embedding),
                        row.project_id,
                        row.kind.to_string(),
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Nearest-neighbor search by query text.
    ///
    /// The query is embedded with the query framing, candidates are scored by
    /// cosine similarity, and `CANDIDATE_MULTIPLIER * limit` best hits are
    /// post-filtered by project and kind before truncating to `limit`.
    pub async fn search(
        &self,
        query: &str,
        options: &VectorSearchOptions,
    ) -> Result<Vec<VectorHit>, EngramError> {
        self.init().await?;
        let query_embedding = self.pipeline.embed_query(query).await?;

        let rows = self.load_rows().await?;
        let mut scored: Vec<(VectorRow, f32)> = rows
            .into_iter()
            .filter_map(|row| {
                if row.embedding.len() != query_embedding.len() {
                    return None;
                }
                let sim = cosine_similarity(&query_embedding, &row.embedding);
                Some((row, sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let limit = options.limit.max(1);
        let hits = scored
            .into_iter()
            .take(limit * CANDIDATE_MULTIPLIER)
            .filter(|(row, _)| {
                options
                    .project_id
                    .as_ref()
                    .is_none_or(|p| &row.project_id == p)
            })
            .filter(|(row, _)| options.kind.is_none_or(|k| row.kind == k))
            .take(limit)
            .map(|(row, score)| VectorHit {
                id: row.id,
                kind: row.kind,
                score,
            })
            .collect();
        Ok(hits)
    }

    async fn load_rows(&self) -> Result<Vec<VectorRow>, EngramError> {
        self.db
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, embedding, project_id, kind, created_at FROM vectors",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let blob: Vec<u8> = row.get(1)?;
                        let kind: String = row.get(3)?;
                        Ok(VectorRow {
                            id: row.get(0)?,
                            embedding: blob_to_vec(&blob),
                            project_id: row.get(2)?,
                            kind: ObservationKind::from_str(&kind)
                                .unwrap_or(ObservationKind::Conversation),
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Remove one vector. Best-effort; failures are logged, not propagated.
    pub async fn delete(&self, id: &str) {
        let id = id.to_string();
        let result = self
            .db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM vectors WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to delete vector");
        }
    }

    /// Remove all vectors for a project. Best-effort.
    pub async fn delete_by_project(&self, project_id: &str) {
        let project_id = project_id.to_string();
        let result = self
            .db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "DELETE FROM vectors WHERE project_id = ?1",
                    params![project_id],
                )?;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to delete project vectors");
        }
    }

    /// Remove every vector. Best-effort.
    pub async fn clear(&self) {
        let result = self
            .db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM vectors", [])?;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to clear vector index");
        }
    }

    /// Number of stored vectors.
    pub async fn count(&self) -> Result<i64, EngramError> {
        self.db
            .connection()
            .call(|conn| {
                let n = conn.query_row("SELECT count(*) FROM vectors", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .map_err(map_tr_err)
    }

    /// The relevance floor consumers apply before using results as context.
    pub fn relevance_floor(&self) -> f64 {
        self.config.relevance_floor
    }
}

/// Fingerprint of an embedding model identity.
///
/// Hashes name and output dimensions together; two models publishing under
/// the same name with different dimensions must not share stored vectors.
pub fn model_fingerprint(model_name: &str, dimensions: usize) -> String {
    let digest = Sha256::digest(format!("{model_name}:{dimensions}").as_bytes());
    hex::encode(digest)
}

/// Serialize an f32 vector into a little-endian BLOB.
pub(crate) fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Deserialize a little-endian BLOB back into an f32 vector.
pub(crate) fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_config::model::EmbeddingConfig;

    fn index_with_model(db: &Database, dir: &std::path::Path, model: &str) -> VectorIndex {
        let mut embed_config = EmbeddingConfig::default();
        embed_config.model_name = model.to_string();
        embed_config.data_dir = dir.to_string_lossy().into_owned();
        let pipeline = Arc::new(EmbeddingPipeline::new(embed_config));
        VectorIndex::new(
            db.clone(),
            pipeline,
            MemoryConfig::default(),
            dir.to_path_buf(),
        )
    }

    fn row(id: &str, project_id: &str, embedding: Vec<f32>) -> VectorRow {
        VectorRow {
            id: id.to_string(),
            embedding,
            project_id: project_id.to_string(),
            kind: ObservationKind::Explore,
            created_at: 100,
        }
    }

    #[tokio::test]
    async fn model_change_wipes_stale_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();

        let index = index_with_model(&db, dir.path(), "all-MiniLM-L6-v2");
        index.add(row("v1", "proj-1", vec![1.0, 0.0])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        // A new index over the same database with a different model must
        // drop every stored vector before accepting new rows.
        let migrated = index_with_model(&db, dir.path(), "bge-small-en-v1.5");
        migrated.init().await.unwrap();
        assert_eq!(migrated.count().await.unwrap(), 0);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn same_model_preserves_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();

        let index = index_with_model(&db, dir.path(), "all-MiniLM-L6-v2");
        index.add(row("v1", "proj-1", vec![1.0, 0.0])).await.unwrap();

        let reopened = index_with_model(&db, dir.path(), "all-MiniLM-L6-v2");
        reopened.init().await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn add_replaces_row_with_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();

        let index = index_with_model(&db, dir.path(), "all-MiniLM-L6-v2");
        index.add(row("v1", "proj-1", vec![1.0, 0.0])).await.unwrap();
        index.add(row("v1", "proj-1", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_by_project_leaves_other_projects() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();

        let index = index_with_model(&db, dir.path(), "all-MiniLM-L6-v2");
        index.add(row("v1", "proj-1", vec![1.0, 0.0])).await.unwrap();
        index.add(row("v2", "proj-2", vec![0.0, 1.0])).await.unwrap();

        index.delete_by_project("proj-1").await;
        assert_eq!(index.count().await.unwrap(), 1);
        db.close().await.unwrap();
    }

    #[test]
    fn blob_round_trips() {
        let v = vec![0.1_f32, -2.5, 3.75, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[1.0, 2.0]);
        blob.push(0xFF);
        assert_eq!(blob_to_vec(&blob), vec![1.0, 2.0]);
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        assert_eq!(
            model_fingerprint("all-MiniLM-L6-v2", 384),
            model_fingerprint("all-MiniLM-L6-v2", 384)
        );
        assert_ne!(
            model_fingerprint("all-MiniLM-L6-v2", 384),
            model_fingerprint("bge-small-en-v1.5", 384)
        );
        assert_ne!(
            model_fingerprint("all-MiniLM-L6-v2", 384),
            model_fingerprint("all-MiniLM-L6-v2", 768)
        );
        assert_eq!(model_fingerprint("all-MiniLM-L6-v2", 384).len(), 64);
    }
}
