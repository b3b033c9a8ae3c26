use gradebookd::ipc;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_from_env("GRADEBOOKD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let mut state = ipc::AppState::default();

    if let Some(path) = std::env::var_os("GRADEBOOKD_WORKSPACE").map(PathBuf::from) {
        let req = ipc::Request {
            id: "startup".to_string(),
            method: "workspace.select".to_string(),
            params: serde_json::json!({ "path": path.to_string_lossy() }),
            actor: None,
        };
        let resp = ipc::handle_request(&mut state, req);
        if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            tracing::error!(response = %resp, "failed to open startup workspace");
        }
    }

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
                tracing::warn!(error = %e, "bad request json");
                let body = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", body);
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
    tracing::info!("stdin closed, exiting");
}
