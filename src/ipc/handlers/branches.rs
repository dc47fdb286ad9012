use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn branches_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT code, name FROM branches ORDER BY code")
        .map_err(HandlerErr::db)?;
    let branches = stmt
        .query_map([], |r| {
            let code: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok(json!({ "code": code, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "branches": branches }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "branches.list" => {
            let conn = match db_conn(state, req) {
                Ok(v) => v,
                Err(e) => return Some(e),
            };
            Some(match branches_list(conn) {
                Ok(result) => ok(&req.id, result),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
