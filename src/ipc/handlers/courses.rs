use crate::access::{Action, Module};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::handlers::students::student_exists;
use crate::ipc::helpers::{req_str, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub(crate) fn course_exists(conn: &Connection, course_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("course not found")
            .with_details(json!({ "courseId": course_id })));
    }
    Ok(())
}

/// National ids of the students enrolled in `course_id`, by name.
pub(crate) fn roster_ids(conn: &Connection, course_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.national_id
             FROM enrollments e
             JOIN students s ON s.national_id = e.student_id
             WHERE e.course_id = ?
             ORDER BY s.full_name, s.national_id",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([course_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn courses_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    // Correlated subquery keeps the count from multiplying rows.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.grade_level,
               c.parallel,
               c.school_year,
               (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS student_count
             FROM courses c
             ORDER BY c.school_year DESC, c.grade_level, c.parallel",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "gradeLevel": r.get::<_, String>(2)?,
                "parallel": r.get::<_, String>(3)?,
                "schoolYear": r.get::<_, String>(4)?,
                "studentCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Create)?;
    let grade_level = req_str(req, "gradeLevel")?;
    let parallel = req_str(req, "parallel")?;
    let school_year = req_str(req, "schoolYear")?;
    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{} {}", grade_level, parallel));

    let dup: Option<String> = conn
        .query_row(
            "SELECT id FROM courses WHERE grade_level = ? AND parallel = ? AND school_year = ?",
            (&grade_level, &parallel, &school_year),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if let Some(existing) = dup {
        return Err(HandlerErr::new("conflict", "course already exists")
            .with_details(json!({ "courseId": existing })));
    }

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, grade_level, parallel, school_year) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &name, &grade_level, &parallel, &school_year),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "courses" })))?;
    Ok(json!({ "courseId": course_id, "name": name }))
}

/// Drops the course and its enrollments. Grade rows belong to the student
/// and are kept.
fn courses_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Delete)?;
    let course_id = req_str(req, "courseId")?;
    course_exists(conn, &course_id)?;
    conn.execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "deleted": true }))
}

fn courses_roster(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Read)?;
    let course_id = req_str(req, "courseId")?;
    course_exists(conn, &course_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT s.national_id, s.full_name, s.gender, e.enrolled_at
             FROM enrollments e
             JOIN students s ON s.national_id = e.student_id
             WHERE e.course_id = ?
             ORDER BY s.full_name, s.national_id",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "nationalId": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "gender": r.get::<_, String>(2)?,
                "enrolledAt": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "courseId": course_id, "students": students }))
}

/// A student sits in at most one course; setting moves them.
fn enrollment_set(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let student_id = req_str(req, "studentId")?;
    let course_id = req_str(req, "courseId")?;
    student_exists(conn, &student_id)?;
    course_exists(conn, &course_id)?;
    conn.execute(
        "INSERT INTO enrollments(student_id, course_id, enrolled_at) VALUES(?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           course_id = excluded.course_id,
           enrolled_at = excluded.enrolled_at",
        (&student_id, &course_id, db::now_stamp()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "enrollments" })))?;
    Ok(json!({ "studentId": student_id, "courseId": course_id }))
}

fn enrollment_remove(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let student_id = req_str(req, "studentId")?;
    let removed = conn
        .execute("DELETE FROM enrollments WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    Ok(json!({ "removed": removed > 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "courses.list" => courses_list,
            "courses.create" => courses_create,
            "courses.delete" => courses_delete,
            "courses.roster" => courses_roster,
            "enrollment.set" => enrollment_set,
            "enrollment.remove" => enrollment_remove,
            _ => return None,
        };
    let result = require_db(state.db.as_ref()).and_then(|conn| handler(conn, req));
    Some(respond(&req.id, result))
}
