use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, optional_i64, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn require_branch(conn: &Connection, code: &str) -> Result<String, HandlerErr> {
    let code = code.to_ascii_uppercase();
    let found: Option<String> = conn
        .query_row("SELECT code FROM branches WHERE code = ?", [&code], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    found.ok_or_else(|| {
        HandlerErr::with_details("not_found", "branch not found", json!({ "branch": code }))
    })
}

fn student_row_json(r: &rusqlite::Row<'_>) -> Result<serde_json::Value, rusqlite::Error> {
    let usn: String = r.get(0)?;
    let name: String = r.get(1)?;
    let username: String = r.get(2)?;
    let branch: String = r.get(3)?;
    let year: i64 = r.get(4)?;
    let semester: i64 = r.get(5)?;
    let serial: i64 = r.get(6)?;
    Ok(json!({
        "usn": usn,
        "name": name,
        "username": username,
        "branch": branch,
        "year": year,
        "semester": semester,
        "serial": serial
    }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = require_branch(conn, &required_str(params, "branch")?)?;
    let semester = optional_i64(params, "semester");

    let students = match semester {
        Some(sem) => {
            let mut stmt = conn
                .prepare(
                    "SELECT usn, name, username, branch, year, semester, serial
                     FROM students
                     WHERE branch = ? AND semester = ?
                     ORDER BY serial, usn",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map((&branch, sem), |r| student_row_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT usn, name, username, branch, year, semester, serial
                     FROM students
                     WHERE branch = ?
                     ORDER BY serial, usn",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map([&branch], |r| student_row_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
    };

    Ok(json!({ "branch": branch, "students": students }))
}

fn upsert_student_row(
    conn: &Connection,
    branch: &str,
    name: &str,
    usn: &str,
    year: i64,
    semester: i64,
) -> Result<(), HandlerErr> {
    let username = roster::derive_username(name, usn);
    let password_hash = db::hash_secret(usn);
    let serial = roster::trailing_serial(usn).unwrap_or(0);
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(usn, name, username, password_hash, branch, year, semester, serial, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(usn) DO UPDATE SET
           name = excluded.name,
           username = excluded.username,
           password_hash = excluded.password_hash,
           branch = excluded.branch,
           year = excluded.year,
           semester = excluded.semester,
           serial = excluded.serial,
           updated_at = excluded.updated_at",
        (usn, name, &username, &password_hash, branch, year, semester, serial, &now, &now),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(())
}

fn student_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = require_branch(conn, &required_str(params, "branch")?)?;
    let usn = required_str(params, "usn")?.to_ascii_uppercase();
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let year = optional_i64(params, "year").unwrap_or(1);
    let semester = optional_i64(params, "semester").unwrap_or(1);

    upsert_student_row(conn, &branch, &name, &usn, year, semester)?;
    Ok(json!({ "usn": usn }))
}

fn student_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = require_branch(conn, &required_str(params, "branch")?)?;
    let usn = required_str(params, "usn")?.to_ascii_uppercase();

    let tx = conn.unchecked_transaction().map_err(|e| {
        HandlerErr::new("db_tx_failed", e.to_string())
    })?;
    // Marks for every term go with the student.
    tx.execute("DELETE FROM subject_scores WHERE usn = ?", [&usn])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.execute("DELETE FROM term_marks WHERE usn = ?", [&usn])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    let removed = tx
        .execute(
            "DELETE FROM students WHERE usn = ? AND branch = ?",
            (&usn, &branch),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "removed": removed > 0 }))
}

fn roster_import(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = require_branch(conn, &required_str(params, "branch")?)?;
    let path = PathBuf::from(required_str(params, "path")?);

    let import = roster::parse_roster_csv(&path, &branch)
        .map_err(|e| HandlerErr::new("import_failed", format!("{e:#}")))?;

    let tx = conn.unchecked_transaction().map_err(|e| {
        HandlerErr::new("db_tx_failed", e.to_string())
    })?;
    for row in &import.rows {
        upsert_student_row(&tx, &branch, &row.name, &row.usn, row.year, row.semester)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(
        branch = %branch,
        added = import.rows.len(),
        skipped = import.skipped,
        "roster import finished"
    );
    Ok(json!({ "added": import.rows.len(), "skipped": import.skipped }))
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
        "students.list" => Some(dispatch(state, req, students_list)),
        "students.upsert" => Some(dispatch(state, req, student_upsert)),
        "students.delete" => Some(dispatch(state, req, student_delete)),
        "roster.importCsv" => Some(dispatch(state, req, roster_import)),
        _ => None,
    }
}
