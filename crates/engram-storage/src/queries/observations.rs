// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observation persistence and lookup.

use std::collections::HashMap;
use std::str::FromStr;

use engram_core::EngramError;
use rusqlite::{Row, params};

use crate::database::Database;
use crate::models::{Observation, ObservationKind, list_from_json, list_to_json};

pub(crate) fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let kind: String = row.get(3)?;
    let facts: String = row.get(7)?;
    let concepts: String = row.get(8)?;
    let files_read: String = row.get(9)?;
    let files_modified: String = row.get(10)?;
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project_id: row.get(2)?,
        kind: ObservationKind::from_str(&kind).unwrap_or(ObservationKind::Conversation),
        title: row.get(4)?,
        subtitle: row.get(5)?,
        narrative: row.get(6)?,
        facts: list_from_json(&facts),
        concepts: list_from_json(&concepts),
        files_read: list_from_json(&files_read),
        files_modified: list_from_json(&files_modified),
        tool_name: row.get(11)?,
        tool_call_id: row.get(12)?,
        created_at: row.get(13)?,
    })
}

pub(crate) const OBSERVATION_COLUMNS: &str = "id, session_id, project_id, kind, title, subtitle, \
     narrative, facts, concepts, files_read, files_modified, tool_name, tool_call_id, created_at";

/// Insert an observation.
///
/// Returns `false` without writing when an observation with the same
/// `tool_call_id` already exists for the session; tool results can be
/// replayed and must not produce duplicate memories.
pub async fn insert_observation(db: &Database, obs: &Observation) -> Result<bool, EngramError> {
    let obs = obs.clone();
    db.connection()
        .call(move |conn| {
            if let Some(tool_call_id) = &obs.tool_call_id {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(
                         SELECT 1 FROM observations
                         WHERE session_id = ?1 AND tool_call_id = ?2)",
                    params![obs.session_id, tool_call_id],
                    |row| row.get(0),
                )?;
                if exists {
                    return Ok(false);
                }
            }
            conn.execute(
                "INSERT INTO observations
                     (id, session_id, project_id, kind, title, subtitle, narrative,
                      facts, concepts, files_read, files_modified, tool_name,
                      tool_call_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    obs.id,
                    obs.session_id,
                    obs.project_id,
                    obs.kind.to_string(),
                    obs.title,
                    obs.subtitle,
                    obs.narrative,
                    list_to_json(&obs.facts),
                    list_to_json(&obs.concepts),
                    list_to_json(&obs.files_read),
                    list_to_json(&obs.files_modified),
                    obs.tool_name,
                    obs.tool_call_id,
                    obs.created_at,
                ],
            )?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch observations by id, preserving the order of `ids`.
///
/// Ids with no matching row are silently skipped; the vector index can hold
/// entries for observations that were since deleted.
pub async fn get_by_ids(db: &Database, ids: &[String]) -> Result<Vec<Observation>, EngramError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(ids.iter()),
                row_to_observation,
            )?;
            let mut by_id: HashMap<String, Observation> = HashMap::new();
            for row in rows {
                let obs = row?;
                by_id.insert(obs.id.clone(), obs);
            }
            Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recent observations for a project, newest first.
///
/// When `substantive_only` is set, conversation-kind observations are
/// excluded so recency fallbacks surface project knowledge instead of chat
/// flow.
pub async fn recent(
    db: &Database,
    project_id: &str,
    limit: usize,
    substantive_only: bool,
) -> Result<Vec<Observation>, EngramError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = if substantive_only {
                format!(
                    "SELECT {OBSERVATION_COLUMNS} FROM observations
                     WHERE project_id = ?1 AND kind != 'conversation'
                     ORDER BY created_at DESC LIMIT ?2"
                )
            } else {
                format!(
                    "SELECT {OBSERVATION_COLUMNS} FROM observations
                     WHERE project_id = ?1
                     ORDER BY created_at DESC LIMIT ?2"
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![project_id, limit as i64], row_to_observation)?;
            let mut observations = Vec::new();
            for row in rows {
                observations.push(row?);
            }
            Ok(observations)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete a single observation. Returns `true` when a row was removed.
pub async fn delete_observation(db: &Database, id: &str) -> Result<bool, EngramError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute("DELETE FROM observations WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete all observations for a project. Returns the number of rows removed.
pub async fn delete_by_project(db: &Database, project_id: &str) -> Result<usize, EngramError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM observations WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(n)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count observations for a project.
pub async fn count_by_project(db: &Database, project_id: &str) -> Result<i64, EngramError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.query_row(
                "SELECT count(*) FROM observations WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_observation(id: &str, kind: ObservationKind, created_at: i64) -> Observation {
        Observation {
            id: id.to_string(),
            session_id: "s1".to_string(),
            project_id: "proj-1".to_string(),
            kind,
            title: format!("title {id}"),
            subtitle: String::new(),
            narrative: "inspected the queue drain loop".to_string(),
            facts: vec!["drain snapshots the backlog length".to_string()],
            concepts: vec!["queue".to_string()],
            files_read: vec!["src/queue.rs".to_string()],
            files_modified: vec![],
            tool_name: Some("read".to_string()),
            tool_call_id: Some(format!("call-{id}")),
            created_at,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_roundtrips() {
        let db = Database::open_in_memory().await.unwrap();
        let obs = make_observation("o1", ObservationKind::Explore, 100);
        assert!(insert_observation(&db, &obs).await.unwrap());

        let fetched = get_by_ids(&db, &["o1".to_string()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].kind, ObservationKind::Explore);
        assert_eq!(fetched[0].facts, obs.facts);
        assert_eq!(fetched[0].tool_call_id, obs.tool_call_id);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_tool_call_id_is_skipped() {
        let db = Database::open_in_memory().await.unwrap();
        let obs = make_observation("o1", ObservationKind::Edit, 100);
        assert!(insert_observation(&db, &obs).await.unwrap());

        let mut replay = make_observation("o2", ObservationKind::Edit, 200);
        replay.tool_call_id = obs.tool_call_id.clone();
        assert!(!insert_observation(&db, &replay).await.unwrap());

        assert_eq!(count_by_project(&db, "proj-1").await.unwrap(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_by_ids_preserves_requested_order() {
        let db = Database::open_in_memory().await.unwrap();
        for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            insert_observation(&db, &make_observation(id, ObservationKind::Fix, ts))
                .await
                .unwrap();
        }
        let ids = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let fetched = get_by_ids(&db, &ids).await.unwrap();
        let fetched_ids: Vec<_> = fetched.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(fetched_ids, vec!["c", "a"]);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn recent_can_exclude_conversational() {
        let db = Database::open_in_memory().await.unwrap();
        insert_observation(&db, &make_observation("o1", ObservationKind::Conversation, 100))
            .await
            .unwrap();
        insert_observation(&db, &make_observation("o2", ObservationKind::Implement, 200))
            .await
            .unwrap();

        let all = recent(&db, "proj-1", 10, false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "o2");

        let substantive = recent(&db, "proj-1", 10, true).await.unwrap();
        assert_eq!(substantive.len(), 1);
        assert_eq!(substantive[0].id, "o2");
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_observation_and_project_cascade() {
        let db = Database::open_in_memory().await.unwrap();
        insert_observation(&db, &make_observation("o1", ObservationKind::Fix, 100))
            .await
            .unwrap();
        insert_observation(&db, &make_observation("o2", ObservationKind::Fix, 200))
            .await
            .unwrap();

        assert!(delete_observation(&db, "o1").await.unwrap());
        assert!(!delete_observation(&db, "o1").await.unwrap());

        assert_eq!(delete_by_project(&db, "proj-1").await.unwrap(), 1);
        assert_eq!(count_by_project(&db, "proj-1").await.unwrap(), 0);
        db.close().await.unwrap();
    }
}
