mod calc;
mod config;
mod db;
mod ipc;
mod pdf;
mod roster;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging() {
    // stdout carries the protocol; diagnostics go to stderr only.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() {
    init_logging();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No request id to echo back for an undecodable line.
                warn!(error = %e, "dropping undecodable request line");
                json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        let encoded =
            serde_json::to_string(&reply).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        let _ = writeln!(out, "{}", encoded);
        let _ = out.flush();
    }
}
