use crate::access::{Action, Module};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::handlers::grades::{load_policy, recompute_student};
use crate::ipc::helpers::require_db;
use crate::ipc::types::{AppState, Request};
use crate::policy::{GradingPolicy, GRADING_POLICY_KEY};
use rusqlite::Connection;
use serde_json::json;

fn grading_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Read)?;
    let policy = load_policy(conn)?;
    Ok(json!({
        "policy": policy,
        "defaults": GradingPolicy::default(),
    }))
}

/// Saves a patched policy and re-derives every stored status under it.
/// Students whose stored scores fall outside a narrowed scale are reported
/// and left as they were.
fn grading_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let actor = guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let current = load_policy(conn)?;
    let next = current
        .patched(patch)
        .map_err(|m| HandlerErr::new("invalid_policy", m))?;

    let mut stmt = conn
        .prepare("SELECT DISTINCT student_id FROM trimester_grades ORDER BY student_id")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let student_ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let value = serde_json::to_value(next)
        .map_err(|e| HandlerErr::new("invalid_policy", e.to_string()))?;
    db::settings_set_json(&tx, GRADING_POLICY_KEY, &value)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;

    let mut recomputed = 0usize;
    let mut errors = Vec::new();
    for sid in &student_ids {
        match recompute_student(&tx, &next, sid) {
            Ok(_) => recomputed += 1,
            Err(e) if e.code == "validation_error" => errors.push(json!({
                "studentId": sid,
                "code": e.code,
                "message": e.message,
            })),
            Err(e) => {
                let _ = tx.rollback();
                return Err(e);
            }
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::info!(
        actor = %actor.user_id,
        pass_mark = next.pass_mark,
        remedial_floor = next.remedial_floor,
        min_score = next.min_score,
        max_score = next.max_score,
        recomputed,
        skipped = errors.len(),
        "grading policy updated"
    );
    Ok(json!({
        "policy": next,
        "recomputed": recomputed,
        "errors": errors,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "setup.grading.get" => grading_get,
            "setup.grading.update" => grading_update,
            _ => return None,
        };
    let result = require_db(state.db.as_ref()).and_then(|conn| handler(conn, req));
    Some(respond(&req.id, result))
}
