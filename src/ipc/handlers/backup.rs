use crate::access::{Action, Module};
use crate::backup;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::handlers::core::select_workspace;
use crate::ipc::helpers::{req_str, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn current_workspace(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn backup_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let workspace = current_workspace(state)?;
    let out_path = PathBuf::from(req_str(req, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:#}")))?;
    tracing::info!(out = %out_path.display(), sha256 = %summary.db_sha256, "workspace exported");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
    }))
}

/// Replaces the open workspace's database and reopens it.
fn backup_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state.db.as_ref())?;
    guard::require(conn, req, Module::Maintenance, Action::Create)?;
    let workspace = current_workspace(state)?;
    let in_path = PathBuf::from(req_str(req, "inPath")?);

    // The connection must be closed before the file underneath it moves.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    let reopened = select_workspace(state, &workspace);

    let summary = imported.map_err(|e| HandlerErr::new("backup_failed", format!("{e:#}")))?;
    reopened.map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    tracing::info!(input = %in_path.display(), format = %summary.bundle_format_detected, "workspace imported");
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => backup_export(state, req),
        "backup.import" => backup_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
