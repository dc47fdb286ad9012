use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, required_term, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use super::marks;

const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "doc", "docx", "ppt", "pptx", "zip"];
const MODULE_COUNT: usize = 5;

fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn module_label(n: usize) -> String {
    format!("Module {}", n)
}

fn valid_module(module: &str) -> bool {
    (1..=MODULE_COUNT).any(|n| module_label(n) == module)
}

/// Matching key for subject names: the portal's entry grid and the notes
/// uploader disagree on spacing and case, so both sides are folded.
fn subject_key(subject: &str) -> String {
    subject.trim().to_lowercase().replace(' ', "")
}

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

/// Registers an uploaded note. The file bytes themselves are stored by the
/// host; the daemon records where they landed.
fn notes_upload(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = require_branch(conn, &required_str(params, "branch")?)?;
    let semester = required_term(params, "semester")?;
    let subject = required_str(params, "subject")?;
    let module = required_str(params, "module")?;
    let filename = required_str(params, "filename")?;
    let filepath = required_str(params, "filepath")?;
    let uploader = params
        .get("uploader")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if !valid_module(&module) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "module must be one of Module 1..Module 5",
            json!({ "module": module }),
        ));
    }
    if !allowed_file(&filename) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "file type not allowed",
            json!({ "filename": filename }),
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notes(id, branch, semester, subject, module, filename, filepath, uploader, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &branch,
            semester,
            &subject,
            &module,
            &filename,
            &filepath,
            &uploader,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "noteId": id }))
}

fn notes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let branch = require_branch(conn, &required_str(params, "branch")?)?;
    let semester = required_term(params, "semester")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, module, filename, filepath, uploader, created_at
             FROM notes
             WHERE branch = ? AND semester = ?
             ORDER BY created_at DESC, id",
        )
        .map_err(HandlerErr::db)?;
    let notes = stmt
        .query_map((&branch, semester), |r| {
            let id: String = r.get(0)?;
            let subject: String = r.get(1)?;
            let module: String = r.get(2)?;
            let filename: String = r.get(3)?;
            let filepath: String = r.get(4)?;
            let uploader: Option<String> = r.get(5)?;
            let created_at: String = r.get(6)?;
            Ok(json!({
                "id": id,
                "subject": subject,
                "module": module,
                "filename": filename,
                "filepath": filepath,
                "uploader": uploader,
                "createdAt": created_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "branch": branch, "semester": semester, "notes": notes }))
}

/// Per-subject module availability for a student's current term. Subjects
/// come from the student's own marks record, so the matrix mirrors exactly
/// what they study; a student with no marks yet sees an empty matrix.
fn notes_student_matrix(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let usn = required_str(params, "usn")?.to_ascii_uppercase();

    let student: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT name, branch, semester FROM students WHERE usn = ?",
            [&usn],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((name, branch, semester)) = student else {
        return Err(HandlerErr::with_details(
            "not_found",
            "student not found",
            json!({ "usn": usn }),
        ));
    };

    let subjects: Vec<String> = marks::fetch_term_record(conn, &usn, semester)?
        .map(|rows| rows.into_iter().map(|r| r.subject).collect())
        .unwrap_or_default();

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, module, filename FROM notes
             WHERE branch = ? AND semester = ?
             ORDER BY created_at, id",
        )
        .map_err(HandlerErr::db)?;
    let uploaded_rows = stmt
        .query_map((&branch, semester), |r| {
            let id: String = r.get(0)?;
            let subject: String = r.get(1)?;
            let module: String = r.get(2)?;
            let filename: String = r.get(3)?;
            Ok((id, subject, module, filename))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    // Later uploads for the same subject+module replace earlier ones.
    let mut uploaded: HashMap<(String, String), (String, String)> = HashMap::new();
    for (id, subject, module, filename) in uploaded_rows {
        uploaded.insert((subject_key(&subject), module), (id, filename));
    }

    let mut matrix = Vec::with_capacity(subjects.len());
    for subject in &subjects {
        let key = subject_key(subject);
        let modules: Vec<serde_json::Value> = (1..=MODULE_COUNT)
            .map(|n| {
                let label = module_label(n);
                match uploaded.get(&(key.clone(), label.clone())) {
                    Some((id, filename)) => json!({
                        "module": label,
                        "uploaded": true,
                        "id": id,
                        "filename": filename,
                    }),
                    None => json!({ "module": label, "uploaded": false }),
                }
            })
            .collect();
        matrix.push(json!({ "subject": subject, "modules": modules }));
    }

    Ok(json!({
        "student": { "usn": usn, "name": name, "branch": branch, "semester": semester },
        "subjects": matrix,
    }))
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
        "notes.upload" => Some(dispatch(state, req, notes_upload)),
        "notes.list" => Some(dispatch(state, req, notes_list)),
        "notes.studentMatrix" => Some(dispatch(state, req, notes_student_matrix)),
        _ => None,
    }
}
