mod auth;
mod calc;
mod config;
mod db;
mod grades;
mod ipc;

use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cfg = config::Config::load()?;

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter)),
        )
        .init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        db_file: cfg.db_file.clone(),
    };
    if let Some(path) = &cfg.workspace {
        let conn = db::open_db(path, &cfg.db_file)?;
        tracing::info!(workspace = %path.display(), "workspace opened from config");
        state.workspace = Some(path.clone());
        state.db = Some(conn);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "classboardd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "malformed request");
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    tracing::info!("stdin closed; shutting down");
    Ok(())
}
