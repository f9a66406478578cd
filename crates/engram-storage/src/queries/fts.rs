// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! BM25 lexical search over observations via FTS5.
//!
//! Raw user text is never handed to the FTS5 query parser. Each token is
//! double-quoted so operators like `-`, `:`, and `NEAR` are treated as
//! literal text. Queries too short to tokenize usefully, or containing any
//! non-ASCII letters, fall back to a per-token LIKE substring scan.

use engram_core::EngramError;
use rusqlite::params;

use crate::database::Database;

/// Search observations by BM25 relevance.
///
/// Returns `(observation_id, bm25_score)` pairs sorted by relevance. BM25
/// scores are negative (more negative = more relevant). Results are scoped
/// to the given project when one is provided.
pub async fn search_bm25(
    db: &Database,
    project_id: Option<&str>,
    query: &str,
    limit: usize,
) -> Result<Vec<(String, f64)>, EngramError> {
    let Some(sanitized) = sanitize_match_query(query) else {
        return search_like(db, project_id, query, limit).await;
    };
    let project_id = project_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut results = Vec::new();
            let map_row = |row: &rusqlite::Row<'_>| {
                let id: String = row.get(0)?;
                let score: f64 = row.get(1)?;
                Ok((id, score))
            };
            match &project_id {
                Some(project_id) => {
                    let mut stmt = conn.prepare(
                        "SELECT o.id, bm25(observations_fts) as score
                         FROM observations_fts
                         JOIN observations o ON o.rowid = observations_fts.rowid
                         WHERE observations_fts MATCH ?1 AND o.project_id = ?2
                         ORDER BY bm25(observations_fts) LIMIT ?3",
                    )?;
                    let rows = stmt.query_map(params![sanitized, project_id, limit as i64], map_row)?;
                    for row in rows {
                        results.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT o.id, bm25(observations_fts) as score
                         FROM observations_fts
                         JOIN observations o ON o.rowid = observations_fts.rowid
                         WHERE observations_fts MATCH ?1
                         ORDER BY bm25(observations_fts) LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![sanitized, limit as i64], map_row)?;
                    for row in rows {
                        results.push(row?);
                    }
                }
            }
            Ok(results)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Substring fallback for queries the FTS tokenizer handles poorly.
///
/// Matches each whitespace token independently so mixed-script queries still
/// hit on their non-Latin terms. Matched rows get a flat sentinel score;
/// ordering falls back to recency.
async fn search_like(
    db: &Database,
    project_id: Option<&str>,
    query: &str,
    limit: usize,
) -> Result<Vec<(String, f64)>, EngramError> {
    let patterns: Vec<String> = query
        .split_whitespace()
        .take(8)
        .map(|t| format!("%{}%", escape_like(t)))
        .collect();
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let project_id = project_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut bindings: Vec<String> = Vec::new();
            if let Some(project_id) = &project_id {
                bindings.push(project_id.clone());
            }
            let scope = if project_id.is_some() {
                "project_id = ?1 AND "
            } else {
                ""
            };
            let mut clauses: Vec<String> = Vec::new();
            for pattern in &patterns {
                bindings.push(pattern.clone());
                let n = bindings.len();
                clauses.push(format!(
                    "(title LIKE ?{n} ESCAPE '\\'
                      OR narrative LIKE ?{n} ESCAPE '\\'
                      OR facts LIKE ?{n} ESCAPE '\\')"
                ));
            }
            let sql = format!(
                "SELECT id FROM observations
                 WHERE {scope}({clauses})
                 ORDER BY created_at DESC LIMIT {limit}",
                clauses = clauses.join(" OR "),
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
                let id: String = row.get(0)?;
                Ok((id, -1.0_f64))
            })?;
            let mut results = Vec::new();
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Build a safe FTS5 MATCH expression from free text.
///
/// Returns `None`, routing to the LIKE fallback, when the text contains any
/// non-ASCII letter (the unicode61 tokenizer does not segment CJK and
/// friends, so MATCH would drop those terms) or when no token of 3+
/// ASCII-alphanumeric characters remains.
fn sanitize_match_query(query: &str) -> Option<String> {
    if query.chars().any(|c| c.is_alphabetic() && !c.is_ascii()) {
        return None;
    }
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
