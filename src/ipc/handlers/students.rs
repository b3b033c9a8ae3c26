use crate::access::{Action, Module};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::helpers::{opt_str, req_str, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

const STUDENT_COLUMNS: &str = "s.national_id, s.full_name, s.gender, s.grade_level, s.parallel, e.course_id";

fn parse_gender(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "male" | "m" => Some("male"),
        "female" | "f" => Some("female"),
        _ => None,
    }
}

fn student_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "nationalId": r.get::<_, String>(0)?,
        "fullName": r.get::<_, String>(1)?,
        "gender": r.get::<_, String>(2)?,
        "gradeLevel": r.get::<_, String>(3)?,
        "parallel": r.get::<_, String>(4)?,
        "courseId": r.get::<_, Option<String>>(5)?,
    }))
}

pub(crate) fn student_exists(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE national_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    Ok(())
}

fn students_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let course_id = opt_str(req, "courseId")?.filter(|s| !s.is_empty());
    let sql = format!(
        "SELECT {}
         FROM students s
         LEFT JOIN enrollments e ON e.student_id = s.national_id
         WHERE (?1 IS NULL OR e.course_id = ?1)
         ORDER BY s.full_name, s.national_id",
        STUDENT_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([&course_id], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let student_id = req_str(req, "studentId")?;
    let sql = format!(
        "SELECT {}
         FROM students s
         LEFT JOIN enrollments e ON e.student_id = s.national_id
         WHERE s.national_id = ?",
        STUDENT_COLUMNS
    );
    let student = conn
        .query_row(&sql, [&student_id], student_json)
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    student
        .map(|s| json!({ "student": s }))
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn students_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Create)?;
    let national_id = req_str(req, "nationalId")?;
    let full_name = req_str(req, "fullName")?;
    let gender_raw = req_str(req, "gender")?;
    let gender = parse_gender(&gender_raw)
        .ok_or_else(|| HandlerErr::bad_params("gender must be one of: male, female"))?;
    let grade_level = req_str(req, "gradeLevel")?;
    let parallel = req_str(req, "parallel")?;

    if student_exists(conn, &national_id).is_ok() {
        return Err(HandlerErr::new("conflict", "a student with this national id already exists")
            .with_details(json!({ "nationalId": national_id })));
    }

    conn.execute(
        "INSERT INTO students(national_id, full_name, gender, grade_level, parallel, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &national_id,
            &full_name,
            gender,
            &grade_level,
            &parallel,
            db::now_stamp(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" })))?;

    Ok(json!({ "nationalId": national_id }))
}

/// The national id is the key and never changes; everything else may.
fn students_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let student_id = req_str(req, "studentId")?;
    student_exists(conn, &student_id)?;
    if req.params.get("nationalId").is_some() {
        return Err(HandlerErr::bad_params("nationalId cannot be changed"));
    }

    let mut sets: Vec<(&'static str, String)> = Vec::new();
    if let Some(v) = opt_str(req, "fullName")?.filter(|s| !s.is_empty()) {
        sets.push(("full_name", v));
    }
    if let Some(v) = opt_str(req, "gender")? {
        let g = parse_gender(&v)
            .ok_or_else(|| HandlerErr::bad_params("gender must be one of: male, female"))?;
        sets.push(("gender", g.to_string()));
    }
    if let Some(v) = opt_str(req, "gradeLevel")?.filter(|s| !s.is_empty()) {
        sets.push(("grade_level", v));
    }
    if let Some(v) = opt_str(req, "parallel")?.filter(|s| !s.is_empty()) {
        sets.push(("parallel", v));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for (column, value) in &sets {
        let sql = format!("UPDATE students SET {} = ? WHERE national_id = ?", column);
        tx.execute(&sql, (value, &student_id))
            .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    tx.execute(
        "UPDATE students SET updated_at = ? WHERE national_id = ?",
        (db::now_stamp(), &student_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({ "nationalId": student_id, "updated": sets.len() }))
}

fn students_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Delete)?;
    let student_id = req_str(req, "studentId")?;
    student_exists(conn, &student_id)?;
    let grade_rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM trimester_grades WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    // enrollment, grade rows and user links follow via foreign keys
    conn.execute("DELETE FROM students WHERE national_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tracing::info!(student_id = %student_id, grade_rows, "student deleted");
    Ok(json!({ "deleted": true, "trimesterRowsRemoved": grade_rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "students.list" => students_list,
            "students.get" => students_get,
            "students.create" => students_create,
            "students.update" => students_update,
            "students.delete" => students_delete,
            _ => return None,
        };
    let result = require_db(state.db.as_ref()).and_then(|conn| handler(conn, req));
    Some(respond(&req.id, result))
}
