use crate::access::{Action, Module, Role};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::helpers::{opt_str, req_enum, req_str, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLES: &str = "admin, teacher, student";

fn user_count(conn: &Connection) -> Result<i64, HandlerErr> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn admin_count(conn: &Connection) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'admin'",
        [],
        |r| r.get(0),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn load_role(conn: &Connection, user_id: &str) -> Result<Role, HandlerErr> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(role) = role else {
        return Err(HandlerErr::not_found("user not found").with_details(json!({ "userId": user_id })));
    };
    Role::parse(&role).ok_or_else(|| HandlerErr::new("db_query_failed", format!("unknown role {}", role)))
}

/// Only student users carry a student link.
fn check_link_role(role: Role, student_id: Option<&str>) -> Result<(), HandlerErr> {
    if student_id.is_some() && role != Role::Student {
        return Err(HandlerErr::bad_params(
            "only student users can be linked to a student record",
        ));
    }
    Ok(())
}

/// The linked student must exist and not belong to another user.
fn check_student_link(
    conn: &Connection,
    role: Role,
    student_id: Option<&str>,
) -> Result<(), HandlerErr> {
    check_link_role(role, student_id)?;
    let Some(sid) = student_id else {
        return Ok(());
    };
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE national_id = ?",
            [sid],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("student not found").with_details(json!({ "studentId": sid })));
    }
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE student_id = ?",
            [sid],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(other) = taken {
        return Err(HandlerErr::new("conflict", "student already linked to another user")
            .with_details(json!({ "studentId": sid, "userId": other })));
    }
    Ok(())
}

fn users_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, username, display_name, role, student_id
             FROM users
             ORDER BY username",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "displayName": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "studentId": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "users": users }))
}

fn users_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let username = req_str(req, "username")?;
    let display_name = opt_str(req, "displayName")?.unwrap_or_else(|| username.clone());
    let role = req_enum(req, "role", Role::parse, ROLES)?;
    let student_id = opt_str(req, "studentId")?.filter(|s| !s.is_empty());

    // The very first account of a workspace must be an admin and needs no actor.
    let bootstrap = user_count(conn)? == 0;
    if bootstrap {
        if role != Role::Admin {
            return Err(HandlerErr::bad_params("the first user of a workspace must be an admin"));
        }
    } else {
        guard::require(conn, req, Module::Maintenance, Action::Create)?;
    }
    check_student_link(conn, role, student_id.as_deref())?;

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [&username],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if taken.is_some() {
        return Err(HandlerErr::new("conflict", "username already exists")
            .with_details(json!({ "username": username })));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, display_name, role, student_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &username,
            &display_name,
            role.as_str(),
            &student_id,
            db::now_stamp(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "users" })))?;

    tracing::info!(user_id = %user_id, role = role.as_str(), bootstrap, "user created");
    Ok(json!({ "userId": user_id, "username": username, "role": role.as_str() }))
}

fn users_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let user_id = req_str(req, "userId")?;
    let current_role = load_role(conn, &user_id)?;

    let display_name = opt_str(req, "displayName")?;
    let role = match req.params.get("role") {
        None => current_role,
        Some(_) => req_enum(req, "role", Role::parse, ROLES)?,
    };
    if current_role == Role::Admin && role != Role::Admin && admin_count(conn)? <= 1 {
        return Err(HandlerErr::new("conflict", "cannot demote the last admin"));
    }

    let link_given = req.params.get("studentId").is_some();
    let student_id = opt_str(req, "studentId")?.filter(|s| !s.is_empty());
    if link_given {
        let current_link: Option<String> = conn
            .query_row("SELECT student_id FROM users WHERE id = ?", [&user_id], |r| r.get(0))
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        // the role rule holds even when the link itself is unchanged
        check_link_role(role, student_id.as_deref())?;
        if current_link != student_id {
            check_student_link(conn, role, student_id.as_deref())?;
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    if let Some(name) = display_name.filter(|s| !s.is_empty()) {
        tx.execute(
            "UPDATE users SET display_name = ? WHERE id = ?",
            (&name, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    tx.execute("UPDATE users SET role = ? WHERE id = ?", (role.as_str(), &user_id))
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if link_given {
        tx.execute(
            "UPDATE users SET student_id = ? WHERE id = ?",
            (&student_id, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    } else if role != Role::Student {
        tx.execute("UPDATE users SET student_id = NULL WHERE id = ?", [&user_id])
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    tx.execute(
        "UPDATE users SET updated_at = ? WHERE id = ?",
        (db::now_stamp(), &user_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({ "userId": user_id, "role": role.as_str() }))
}

fn users_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Delete)?;
    let user_id = req_str(req, "userId")?;
    let role = load_role(conn, &user_id)?;
    if role == Role::Admin && admin_count(conn)? <= 1 {
        return Err(HandlerErr::new("conflict", "cannot delete the last admin"));
    }
    // permissions rows cascade
    conn.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tracing::info!(user_id = %user_id, "user deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "users.list" => users_list,
            "users.create" => users_create,
            "users.update" => users_update,
            "users.delete" => users_delete,
            _ => return None,
        };
    let result = require_db(state.db.as_ref()).and_then(|conn| handler(conn, req));
    Some(respond(&req.id, result))
}
