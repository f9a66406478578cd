// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use engram_core::EngramError;
use tokio_rusqlite::Connection;
use tracing::debug;

/// Handle to the SQLite database backing a project's memory.
///
/// Cloning is cheap; all clones share the single serialized connection.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// The parent directory is created if it does not exist. WAL mode and the
    /// standard pragma set are applied before migrations run.
    pub async fn open(path: &str) -> Result<Self, EngramError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }

        let conn = Connection::open(path).await.map_err(storage_err)?;
        Self::configure(&conn, true).await?;
        debug!(path = %path, "opened memory database");
        Ok(Self { conn })
    }

    /// Open an in-memory database with migrations applied. Test use only,
    /// but kept in the public API so downstream crates can test against it.
    pub async fn open_in_memory() -> Result<Self, EngramError> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        // WAL is meaningless for :memory:; skip it but keep the rest.
        Self::configure(&conn, false).await?;
        Ok(Self { conn })
    }

    async fn configure(conn: &Connection, wal: bool) -> Result<(), EngramError> {
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            if wal {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| crate::migrations::run_migrations(conn))
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Error(inner) => inner,
                other => EngramError::Internal(format!("migration call failed: {other}")),
            })
    }

    /// Access the underlying serialized connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the database, flushing the WAL.
    pub async fn close(self) -> Result<(), EngramError> {
        self.conn.close().await.map_err(map_tr_err)
    }
}

/// Map a tokio-rusqlite error into the storage error variant.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> EngramError {
    EngramError::Storage {
        source: Box::new(e),
    }
}

/// Map any error into the storage error variant.
pub fn storage_err<E>(e: E) -> EngramError
where
    E: std::error::Error + Send + Sync + 'static,
{
    EngramError::Storage {
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/mem.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        assert!(path.exists());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn migrations_apply_on_open() {
        let db = Database::open_in_memory().await.unwrap();
        let count: i64 = db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                let n = conn.query_row(
                    "SELECT count(*) FROM sqlite_master
                     WHERE type = 'table' AND name IN ('sessions', 'prompts', 'observations')",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 3);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn open_is_idempotent_across_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mem.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.close().await.unwrap();
        // Second open must not fail re-running migrations.
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.close().await.unwrap();
    }
}
