use crate::access::{self, Action, Module, Principal};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::Request;
use rusqlite::Connection;
use serde_json::json;

/// Resolves the request's actor and checks `module`/`action` for it.
pub fn require(
    conn: &Connection,
    req: &Request,
    module: Module,
    action: Action,
) -> Result<Principal, HandlerErr> {
    let Some(actor) = req.actor.as_deref() else {
        return Err(HandlerErr::new("unauthorized", "request has no actor"));
    };
    let principal = access::load_principal(conn, actor)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?
        .ok_or_else(|| {
            HandlerErr::new("unauthorized", "unknown actor").with_details(json!({ "actor": actor }))
        })?;

    let allowed = access::authorize_with(&principal, module, action, conn)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    if !allowed {
        tracing::warn!(
            actor = %principal.user_id,
            module = module.as_str(),
            action = action.as_str(),
            method = %req.method,
            "permission denied"
        );
        return Err(HandlerErr::new(
            "forbidden",
            format!("not allowed to {} {}", action.as_str(), module.as_str()),
        )
        .with_details(json!({
            "module": module.as_str(),
            "action": action.as_str(),
        })));
    }
    Ok(principal)
}
