use crate::access::{self, Action, Capabilities, Module, PermissionSource, Principal, Role};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::helpers::{opt_bool, req_enum, req_str, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const MODULES: &str = "inventory, grades, accessibility, maintenance";
const ACTIONS: &str = "read, edit, create, delete";

fn target_principal(conn: &Connection, user_id: &str) -> Result<Principal, HandlerErr> {
    access::load_principal(conn, user_id)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?
        .ok_or_else(|| HandlerErr::not_found("user not found").with_details(json!({ "userId": user_id })))
}

fn caps_json(module: Module, c: &Capabilities) -> serde_json::Value {
    json!({
        "module": module.as_str(),
        "read": c.read,
        "edit": c.edit,
        "create": c.create,
        "delete": c.delete,
    })
}

fn permissions_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let user_id = req_str(req, "userId")?;
    let target = target_principal(conn, &user_id)?;

    let mut rows = Vec::new();
    for m in Module::ALL {
        let stored = conn
            .capabilities(&user_id, m)
            .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
        if let Some(c) = stored {
            rows.push(caps_json(m, &c));
        }
    }
    Ok(json!({
        "userId": user_id,
        "role": target.role.as_str(),
        "implicitAll": target.role == Role::Admin,
        "permissions": rows,
    }))
}

/// Upserts one (user, module) row. Bits left out keep their stored value,
/// or start cleared on a new row.
fn permissions_set(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let actor = guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let user_id = req_str(req, "userId")?;
    target_principal(conn, &user_id)?;
    let module = req_enum(req, "module", Module::parse, MODULES)?;

    let current = conn
        .capabilities(&user_id, module)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?
        .unwrap_or_default();
    let next = Capabilities {
        read: opt_bool(req, "read")?.unwrap_or(current.read),
        edit: opt_bool(req, "edit")?.unwrap_or(current.edit),
        create: opt_bool(req, "create")?.unwrap_or(current.create),
        delete: opt_bool(req, "delete")?.unwrap_or(current.delete),
    };

    conn.execute(
        "INSERT INTO permissions(user_id, module, can_read, can_edit, can_create, can_delete)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, module) DO UPDATE SET
           can_read = excluded.can_read,
           can_edit = excluded.can_edit,
           can_create = excluded.can_create,
           can_delete = excluded.can_delete",
        (
            &user_id,
            module.as_str(),
            next.read as i64,
            next.edit as i64,
            next.create as i64,
            next.delete as i64,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "permissions" })))?;

    tracing::info!(
        granted_by = %actor.user_id,
        user_id = %user_id,
        module = module.as_str(),
        read = next.read,
        edit = next.edit,
        create = next.create,
        delete = next.delete,
        "permission set"
    );
    Ok(json!({ "userId": user_id, "permission": caps_json(module, &next) }))
}

fn permissions_revoke(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Delete)?;
    let user_id = req_str(req, "userId")?;
    let module = req_enum(req, "module", Module::parse, MODULES)?;
    let removed = conn
        .execute(
            "DELETE FROM permissions WHERE user_id = ? AND module = ?",
            (&user_id, module.as_str()),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "removed": removed > 0 }))
}

fn permissions_check(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let user_id = req_str(req, "userId")?;
    let target = target_principal(conn, &user_id)?;
    let module = req_enum(req, "module", Module::parse, MODULES)?;
    let action = req_enum(req, "action", Action::parse, ACTIONS)?;
    let allowed = access::authorize_with(&target, module, action, conn)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    Ok(json!({
        "userId": user_id,
        "module": module.as_str(),
        "action": action.as_str(),
        "allowed": allowed,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "permissions.list" => permissions_list,
            "permissions.set" => permissions_set,
            "permissions.revoke" => permissions_revoke,
            "permissions.check" => permissions_check,
            _ => return None,
        };
    let result = require_db(state.db.as_ref()).and_then(|conn| handler(conn, req));
    Some(respond(&req.id, result))
}
