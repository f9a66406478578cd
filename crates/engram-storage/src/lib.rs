// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Engram memory engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and typed CRUD operations for
//! sessions, prompts, and observations. Lexical (BM25) search lives here;
//! the vector index and ranker live in `engram-memory`.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::{Database, map_tr_err, storage_err};
pub use models::*;
