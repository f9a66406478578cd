// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User prompt persistence.

use engram_core::EngramError;
use rusqlite::params;

use crate::database::Database;
use crate::models::Prompt;

/// Record a user prompt.
pub async fn insert_prompt(db: &Database, prompt: &Prompt) -> Result<(), EngramError> {
    let prompt = prompt.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO prompts (id, session_id, project_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    prompt.id,
                    prompt.session_id,
                    prompt.project_id,
                    prompt.text,
                    prompt.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List prompts for a session in chronological order.
pub async fn list_by_session(db: &Database, session_id: &str) -> Result<Vec<Prompt>, EngramError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, project_id, text, created_at
                 FROM prompts WHERE session_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok(Prompt {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    project_id: row.get(2)?,
                    text: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            let mut prompts = Vec::new();
            for row in rows {
                prompts.push(row?);
            }
            Ok(prompts)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete all prompts for a project. Returns the number of rows removed.
pub async fn delete_by_project(db: &Database, project_id: &str) -> Result<usize, EngramError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM prompts WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(n)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
