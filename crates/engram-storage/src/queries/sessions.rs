// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session CRUD operations.

use engram_core::EngramError;
use rusqlite::{Row, params};

use crate::database::Database;
use crate::models::{Session, SessionStatus, SessionSummary};

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(4)?;
    let request: Option<String> = row.get(7)?;
    let investigated: Option<String> = row.get(8)?;
    let learned: Option<String> = row.get(9)?;
    let completed: Option<String> = row.get(10)?;
    let next_steps: Option<String> = row.get(11)?;
    let summary = request.map(|request| SessionSummary {
        request,
        investigated: investigated.unwrap_or_default(),
        learned: learned.unwrap_or_default(),
        completed: completed.unwrap_or_default(),
        next_steps: next_steps.unwrap_or_default(),
    });
    Ok(Session {
        id: row.get(0)?,
        sub_chat_id: row.get(1)?,
        project_id: row.get(2)?,
        chat_id: row.get(3)?,
        status: SessionStatus::from_str_value(&status),
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
        summary,
    })
}

const SESSION_COLUMNS: &str = "id, sub_chat_id, project_id, chat_id, status, started_at, \
     completed_at, summary_request, summary_investigated, summary_learned, \
     summary_completed, summary_next_steps";

/// Create a new session row.
pub async fn create_session(db: &Database, session: &Session) -> Result<(), EngramError> {
    let session = session.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, sub_chat_id, project_id, chat_id, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.sub_chat_id,
                    session.project_id,
                    session.chat_id,
                    session.status.as_str(),
                    session.started_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a session by ID.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<Session>, EngramError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let result = stmt.query_row(params![id], row_to_session);
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find the active session for a sub-chat, if one exists.
///
/// At most one session per sub-chat should be active at a time; if more than
/// one exists the most recently started wins.
pub async fn find_active_session(
    db: &Database,
    sub_chat_id: &str,
) -> Result<Option<Session>, EngramError> {
    let sub_chat_id = sub_chat_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE sub_chat_id = ?1 AND status = 'active'
                 ORDER BY started_at DESC LIMIT 1"
            ))?;
            let result = stmt.query_row(params![sub_chat_id], row_to_session);
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark any lingering active sessions for a sub-chat as completed.
///
/// Called on session start so a crash in a previous run cannot leave two
/// active sessions for the same sub-chat. Returns the number of sessions
/// force-completed.
pub async fn force_complete_stale(
    db: &Database,
    sub_chat_id: &str,
    now_ms: i64,
) -> Result<usize, EngramError> {
    let sub_chat_id = sub_chat_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE sessions SET status = 'completed', completed_at = ?2
                 WHERE sub_chat_id = ?1 AND status = 'active'",
                params![sub_chat_id, now_ms],
            )?;
            Ok(n)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Transition a session out of the active state.
pub async fn complete_session(
    db: &Database,
    id: &str,
    status: SessionStatus,
    now_ms: i64,
) -> Result<(), EngramError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET status = ?2, completed_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now_ms],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Attach a summary to a session.
pub async fn update_summary(
    db: &Database,
    id: &str,
    summary: &SessionSummary,
) -> Result<(), EngramError> {
    let id = id.to_string();
    let summary = summary.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET summary_request = ?2, summary_investigated = ?3,
                     summary_learned = ?4, summary_completed = ?5, summary_next_steps = ?6
                 WHERE id = ?1",
                params![
                    id,
                    summary.request,
                    summary.investigated,
                    summary.learned,
                    summary.completed,
                    summary.next_steps,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete all sessions for a project. Returns the number of rows removed.
pub async fn delete_by_project(db: &Database, project_id: &str) -> Result<usize, EngramError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM sessions WHERE project_id = ?1",
                params![project_id],
            )?;
            Ok(n)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn make_session(id: &str, sub_chat_id: &str) -> Session {
        Session {
            id: id.to_string(),
            sub_chat_id: sub_chat_id.to_string(),
            project_id: "proj-1".to_string(),
            chat_id: "chat-1".to_string(),
            status: SessionStatus::Active,
            started_at: 1_700_000_000_000,
            completed_at: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_session_roundtrips() {
        let db = setup_db().await;
        let session = make_session("sess-1", "sub-1");

        create_session(&db, &session).await.unwrap();
        let retrieved = get_session(&db, "sess-1").await.unwrap().unwrap();
        assert_eq!(retrieved.id, "sess-1");
        assert_eq!(retrieved.sub_chat_id, "sub-1");
        assert_eq!(retrieved.status, SessionStatus::Active);
        assert!(retrieved.summary.is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_nonexistent_session_returns_none() {
        let db = setup_db().await;
        assert!(get_session(&db, "no-such").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn find_active_session_by_sub_chat() {
        let db = setup_db().await;
        create_session(&db, &make_session("s1", "sub-a")).await.unwrap();
        create_session(&db, &make_session("s2", "sub-b")).await.unwrap();

        let found = find_active_session(&db, "sub-a").await.unwrap().unwrap();
        assert_eq!(found.id, "s1");
        assert!(find_active_session(&db, "sub-c").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn force_complete_stale_clears_active_sessions() {
        let db = setup_db().await;
        create_session(&db, &make_session("s1", "sub-a")).await.unwrap();

        let n = force_complete_stale(&db, "sub-a", 1_700_000_100_000).await.unwrap();
        assert_eq!(n, 1);

        let s = get_session(&db, "s1").await.unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.completed_at, Some(1_700_000_100_000));
        assert!(find_active_session(&db, "sub-a").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn complete_session_with_summary() {
        let db = setup_db().await;
        create_session(&db, &make_session("s1", "sub-a")).await.unwrap();

        let summary = SessionSummary {
            request: "add retry logic".into(),
            investigated: "queue drain path".into(),
            learned: "drain snapshots length".into(),
            completed: "retries capped at three".into(),
            next_steps: "backoff tuning".into(),
        };
        update_summary(&db, "s1", &summary).await.unwrap();
        complete_session(&db, "s1", SessionStatus::Completed, 1_700_000_200_000)
            .await
            .unwrap();

        let s = get_session(&db, "s1").await.unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.summary, Some(summary));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_by_project_removes_sessions() {
        let db = setup_db().await;
        create_session(&db, &make_session("s1", "sub-a")).await.unwrap();
        create_session(&db, &make_session("s2", "sub-b")).await.unwrap();

        let n = delete_by_project(&db, "proj-1").await.unwrap();
        assert_eq!(n, 2);
        assert!(get_session(&db, "s1").await.unwrap().is_none());
        db.close().await.unwrap();
    }
}
