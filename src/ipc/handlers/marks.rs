use crate::calc::RawSubjectRow;
use crate::config;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, raw_cell, required_str, required_term, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::debug;

/// Raw grid rows for one student+term, in entry order. `None` means no
/// marks record exists for that term at all (distinct from an empty one).
pub(super) fn fetch_term_record(
    conn: &Connection,
    usn: &str,
    term: i64,
) -> Result<Option<Vec<RawSubjectRow>>, HandlerErr> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM term_marks WHERE usn = ? AND term = ?",
            (usn, term),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut stmt = conn
        .prepare(
            "SELECT subject, ia1, ia2, ia3, attendance
             FROM subject_scores
             WHERE usn = ? AND term = ?
             ORDER BY position",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((usn, term), |r| {
            Ok(RawSubjectRow {
                subject: r.get(0)?,
                ia1: r.get(1)?,
                ia2: r.get(2)?,
                ia3: r.get(3)?,
                attendance: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(Some(rows))
}

fn row_json(row: &RawSubjectRow) -> serde_json::Value {
    json!({
        "subject": row.subject,
        "ia1": row.ia1,
        "ia2": row.ia2,
        "ia3": row.ia3,
        "attendance": row.attendance,
    })
}

fn blank_rows(subjects: &[String]) -> Vec<RawSubjectRow> {
    subjects
        .iter()
        .map(|s| RawSubjectRow {
            subject: s.clone(),
            ..RawSubjectRow::default()
        })
        .collect()
}

/// The entry grid for a branch+term: one row group per student, raw cells
/// as stored, blanks from the configured subject list when nothing has been
/// saved yet.
fn marks_grid(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = required_str(params, "branch")?.to_ascii_uppercase();
    let term = required_term(params, "term")?;
    let cfg = config::load(conn).map_err(|e| HandlerErr::new("config_load_failed", e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "SELECT usn, name FROM students
             WHERE branch = ? AND semester = ?
             ORDER BY serial, usn",
        )
        .map_err(HandlerErr::db)?;
    let students = stmt
        .query_map((&branch, term), |r| {
            let usn: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok((usn, name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut rows = Vec::with_capacity(students.len());
    for (usn, name) in students {
        let record = fetch_term_record(conn, &usn, term)?;
        let has_record = record.is_some();
        let subject_rows = record.unwrap_or_else(|| blank_rows(&cfg.default_subjects));
        rows.push(json!({
            "student": { "usn": usn, "name": name },
            "hasRecord": has_record,
            "subjects": subject_rows.iter().map(row_json).collect::<Vec<_>>(),
        }));
    }

    Ok(json!({
        "branch": branch,
        "term": term,
        "subjects": cfg.default_subjects,
        "rows": rows,
    }))
}

/// Full-replace save: each submitted student's record for the term is
/// rewritten from scratch, never merged. Cells persist as entered.
fn marks_save_all(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = required_str(params, "branch")?.to_ascii_uppercase();
    let term = required_term(params, "term")?;
    let entries = params
        .get("students")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing students array"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut processed = 0usize;
    let mut skipped = 0usize;

    for entry in entries {
        let usn = required_str(entry, "usn")?.to_ascii_uppercase();
        let known: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM students WHERE usn = ? AND branch = ?",
                (&usn, &branch),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        if known.is_none() {
            skipped += 1;
            continue;
        }

        let subjects = entry
            .get("subjects")
            .and_then(|v| v.as_array())
            .ok_or_else(|| HandlerErr::new("bad_params", "missing subjects array"))?;

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO term_marks(usn, term, updated_at) VALUES(?, ?, ?)
             ON CONFLICT(usn, term) DO UPDATE SET updated_at = excluded.updated_at",
            (&usn, term, &now),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        tx.execute(
            "DELETE FROM subject_scores WHERE usn = ? AND term = ?",
            (&usn, term),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

        for (position, subject) in subjects.iter().enumerate() {
            let name = required_str(subject, "subject")?;
            tx.execute(
                "INSERT INTO subject_scores(usn, term, subject, position, ia1, ia2, ia3, attendance)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(usn, term, subject) DO UPDATE SET
                   position = excluded.position,
                   ia1 = excluded.ia1,
                   ia2 = excluded.ia2,
                   ia3 = excluded.ia3,
                   attendance = excluded.attendance",
                (
                    &usn,
                    term,
                    &name,
                    position as i64,
                    raw_cell(subject, "ia1"),
                    raw_cell(subject, "ia2"),
                    raw_cell(subject, "ia3"),
                    raw_cell(subject, "attendance"),
                ),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
        processed += 1;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    debug!(branch = %branch, term, processed, skipped, "marks saved");
    Ok(json!({ "processed": processed, "skipped": skipped }))
}

/// Explicit reset removes the whole student+term record, not just its rows.
fn marks_reset(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let usn = required_str(params, "usn")?.to_ascii_uppercase();
    let term = required_term(params, "term")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM subject_scores WHERE usn = ? AND term = ?",
        (&usn, term),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    let removed = tx
        .execute(
            "DELETE FROM term_marks WHERE usn = ? AND term = ?",
            (&usn, term),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "removed": removed > 0 }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.grid" => Some(dispatch(state, req, marks_grid)),
        "marks.saveAll" => Some(dispatch(state, req, marks_save_all)),
        "marks.reset" => Some(dispatch(state, req, marks_reset)),
        _ => None,
    }
}
