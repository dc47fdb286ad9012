use crate::calc;
use crate::config;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, optional_i64, required_str, validate_term, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::pdf;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::Path;
use tracing::{debug, warn};

use super::marks;

struct ReportSubject {
    identity: calc::StudentIdentity,
    scores: Vec<calc::SubjectScore>,
    report: calc::AggregatedReport,
}

/// Shared front half of both report surfaces: resolve the student, pick the
/// term (param override, else the student's current semester), fetch the raw
/// record, normalize, aggregate. `not_found` covers both a missing student
/// and a term with no marks record; the latter is the legitimate
/// "nothing to show" state, not a fault.
fn load_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(ReportSubject, config::PortalConfig), HandlerErr> {
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

    let term = match optional_i64(params, "term") {
        Some(t) => {
            validate_term(t)?;
            t
        }
        None => semester,
    };

    let Some(raw_rows) = marks::fetch_term_record(conn, &usn, term)? else {
        return Err(HandlerErr::with_details(
            "not_found",
            "no marks recorded for this semester",
            json!({ "usn": usn, "term": term }),
        ));
    };

    let cfg =
        config::load(conn).map_err(|e| HandlerErr::new("config_load_failed", e.to_string()))?;
    let scores = calc::normalize(&raw_rows);
    let report = calc::aggregate(&scores, cfg.attendance_threshold);

    Ok((
        ReportSubject {
            identity: calc::StudentIdentity {
                name,
                usn,
                branch,
                term,
            },
            scores,
            report,
        },
        cfg,
    ))
}

fn student_marks_model(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (subject, _) = load_report(conn, params)?;
    let model = calc::student_marks_model(subject.identity, &subject.scores, &subject.report);
    serde_json::to_value(&model).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn load_logo(cfg: &config::PortalConfig) -> Option<Vec<u8>> {
    let path = cfg.logo_path.as_deref()?;
    match std::fs::read(Path::new(path)) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            // Missing branding is not a rendering failure.
            warn!(path, error = %e, "logo asset unavailable, omitting");
            None
        }
    }
}

fn marksheet_pdf(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (subject, cfg) = load_report(conn, params)?;
    let model = calc::student_marks_model(subject.identity, &subject.scores, &subject.report);
    let logo = load_logo(&cfg);
    let generated_on = Local::now().date_naive();

    let buffer = pdf::render_marksheet(&model, &cfg, logo.as_deref(), generated_on)
        .map_err(|e| HandlerErr::new("pdf_failed", format!("{e:#}")))?;

    let file_name = format!(
        "{}_Sem{}_Marksheet.pdf",
        model.student.name.replace(' ', "_"),
        model.student.term
    );
    debug!(usn = %model.student.usn, term = model.student.term, bytes = buffer.len(), "marksheet rendered");

    Ok(json!({
        "fileName": file_name,
        "contentType": "application/pdf",
        "byteLength": buffer.len(),
        "dataBase64": BASE64.encode(&buffer),
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
        "reports.studentMarksModel" => Some(dispatch(state, req, student_marks_model)),
        "reports.marksheetPdf" => Some(dispatch(state, req, marksheet_pdf)),
        _ => None,
    }
}
