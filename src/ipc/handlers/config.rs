use crate::config::{self, PortalConfigPatch};
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn config_get(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let cfg =
        config::load(conn).map_err(|e| HandlerErr::new("config_load_failed", e.to_string()))?;
    serde_json::to_value(&cfg).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn config_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let patch: PortalConfigPatch = serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?;
    if let Some(threshold) = patch.attendance_threshold {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(HandlerErr::with_details(
                "bad_params",
                "attendanceThreshold must be within [0, 100]",
                json!({ "attendanceThreshold": threshold }),
            ));
        }
    }

    let mut cfg =
        config::load(conn).map_err(|e| HandlerErr::new("config_load_failed", e.to_string()))?;
    cfg.apply(patch);
    config::store(conn, &cfg)
        .map_err(|e| HandlerErr::new("config_store_failed", e.to_string()))?;
    serde_json::to_value(&cfg).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match config_get(conn) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match config_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
