use crate::access::{Action, Module};
use crate::calc::{self, ComponentPatch, Standing, Trimester, TrimesterView};
use crate::db;
use crate::error::GradeError;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::guard;
use crate::ipc::handlers::courses::course_exists;
use crate::ipc::handlers::students::student_exists;
use crate::ipc::helpers::{opt_f64, opt_str, req_bool, req_enum, req_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::policy::GradingPolicy;
use rusqlite::Connection;
use serde_json::json;
use std::io::Write;
use uuid::Uuid;

const TRIMESTERS: &str = "T1, T2, T3";

pub(crate) fn load_policy(conn: &Connection) -> Result<GradingPolicy, HandlerErr> {
    db::grading_policy(conn).map_err(|e| HandlerErr::new("invalid_policy", format!("{e:#}")))
}

fn standing_json(standing: &Standing) -> serde_json::Value {
    serde_json::to_value(standing).unwrap_or_else(|_| json!(null))
}

/// Writes the derived trimester and annual fields for one student.
fn persist_standing(
    conn: &Connection,
    student_id: &str,
    standing: &Standing,
) -> Result<(), HandlerErr> {
    for v in &standing.trimesters {
        conn.execute(
            "UPDATE trimester_grades SET average = ?, status = ?
             WHERE student_id = ? AND trimester = ?",
            (v.average, v.status.as_str(), student_id, v.trimester.as_str()),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }

    let Some(annual) = &standing.annual else {
        conn.execute("DELETE FROM annual_grades WHERE student_id = ?", [student_id])
            .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
        return Ok(());
    };
    conn.execute(
        "INSERT INTO annual_grades(
           student_id, annual_avg, annual_status, remedial_score,
           final_avg, final_status, provisional, pending, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           annual_avg = excluded.annual_avg,
           annual_status = excluded.annual_status,
           remedial_score = excluded.remedial_score,
           final_avg = excluded.final_avg,
           final_status = excluded.final_status,
           provisional = excluded.provisional,
           pending = excluded.pending,
           updated_at = excluded.updated_at",
        (
            student_id,
            annual.annual_avg,
            annual.annual_status.as_str(),
            standing.remedial_score,
            standing.final_avg,
            standing.final_status.map(|s| s.as_str()),
            annual.provisional as i64,
            standing.pending as i64,
            db::now_stamp(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "annual_grades" }))
    })?;
    Ok(())
}

/// Re-derives and stores everything downstream of a student's components.
pub(crate) fn recompute_student(
    conn: &Connection,
    policy: &GradingPolicy,
    student_id: &str,
) -> Result<Standing, HandlerErr> {
    let rows = calc::load_trimester_rows(conn, student_id)?;
    let remedial = calc::load_remedial_score(conn, student_id)?;
    let standing = calc::compute_standing(policy, &rows, remedial).map_err(|e| {
        let mut h = HandlerErr::from(e);
        let mut details = h.details.take().unwrap_or_else(|| json!({}));
        details["studentId"] = json!(student_id);
        h.details = Some(details);
        h
    })?;
    persist_standing(conn, student_id, &standing)?;
    Ok(standing)
}

fn find_view(standing: &Standing, trimester: Trimester) -> Option<&TrimesterView> {
    standing.trimesters.iter().find(|v| v.trimester == trimester)
}

fn trimester_not_open(student_id: &str, trimester: Trimester) -> HandlerErr {
    HandlerErr::not_found("trimester not opened for student")
        .with_details(json!({ "studentId": student_id, "trimester": trimester }))
}

/// Creates default rows for every enrolled student that lacks one.
fn open_trimester(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Create)?;
    let course_id = req_str(req, "courseId")?;
    let trimester = req_enum(req, "trimester", Trimester::parse, TRIMESTERS)?;
    course_exists(conn, &course_id)?;
    let policy = load_policy(conn)?;
    let roster = super::courses::roster_ids(conn, &course_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut created = 0usize;
    for sid in &roster {
        let n = tx
            .execute(
                "INSERT OR IGNORE INTO trimester_grades(id, student_id, trimester, updated_at)
                 VALUES(?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    sid,
                    trimester.as_str(),
                    db::now_stamp(),
                ),
            )
            .map_err(|e| {
                HandlerErr::db("db_insert_failed", e)
                    .with_details(json!({ "table": "trimester_grades" }))
            })?;
        if n > 0 {
            created += 1;
            recompute_student(&tx, &policy, sid)?;
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::info!(course_id = %course_id, trimester = %trimester, created, "trimester opened");
    Ok(json!({
        "courseId": course_id,
        "trimester": trimester,
        "created": created,
        "existing": roster.len() - created,
    }))
}

fn trimester_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Read)?;
    let student_id = req_str(req, "studentId")?;
    let trimester = req_enum(req, "trimester", Trimester::parse, TRIMESTERS)?;
    student_exists(conn, &student_id)?;
    let policy = load_policy(conn)?;

    let rows = calc::load_trimester_rows(conn, &student_id)?;
    let row = rows
        .iter()
        .find(|r| r.trimester == trimester)
        .ok_or_else(|| trimester_not_open(&student_id, trimester))?;
    let result = calc::evaluate_trimester(&policy, &row.components)?;
    let view = TrimesterView {
        trimester,
        components: row.components,
        locked: row.locked,
        average: result.average,
        status: result.status,
    };
    Ok(json!({ "studentId": student_id, "trimester": view }))
}

fn trimester_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let actor = guard::require(conn, req, Module::Grades, Action::Edit)?;
    let student_id = req_str(req, "studentId")?;
    let trimester = req_enum(req, "trimester", Trimester::parse, TRIMESTERS)?;
    let raw = req
        .params
        .get("components")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing components"))?;
    let patch: ComponentPatch = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::bad_params(format!("invalid components: {}", e)))?;
    if patch.is_empty() {
        return Err(HandlerErr::bad_params(format!(
            "components must set at least one of: {}",
            calc::Components::NAMES.join(", ")
        )));
    }
    student_exists(conn, &student_id)?;
    let policy = load_policy(conn)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let rows = calc::load_trimester_rows(&tx, &student_id)?;
    let row = rows
        .iter()
        .find(|r| r.trimester == trimester)
        .ok_or_else(|| trimester_not_open(&student_id, trimester))?;
    let next = calc::apply_component_patch(&policy, trimester, &row.components, &patch, row.locked)?;

    tx.execute(
        "UPDATE trimester_grades
         SET ai = ?, ag = ?, rp = ?, pi = ?, ex = ?, updated_at = ?
         WHERE student_id = ? AND trimester = ?",
        (
            next.ai,
            next.ag,
            next.rp,
            next.pi,
            next.ex,
            db::now_stamp(),
            &student_id,
            trimester.as_str(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let standing = recompute_student(&tx, &policy, &student_id)?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tracing::debug!(
        actor = %actor.user_id,
        student_id = %student_id,
        trimester = %trimester,
        "trimester components updated"
    );
    Ok(json!({
        "studentId": student_id,
        "trimester": find_view(&standing, trimester),
        "standing": standing_json(&standing),
    }))
}

/// Closes or reopens a grading window, for a whole course or one student.
fn set_locked(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Maintenance, Action::Edit)?;
    let trimester = req_enum(req, "trimester", Trimester::parse, TRIMESTERS)?;
    let locked = req_bool(req, "locked")?;
    let course_id = opt_str(req, "courseId")?.filter(|s| !s.is_empty());
    let student_id = opt_str(req, "studentId")?.filter(|s| !s.is_empty());

    let updated = match (course_id, student_id) {
        (Some(cid), None) => {
            course_exists(conn, &cid)?;
            conn.execute(
                "UPDATE trimester_grades SET locked = ?
                 WHERE trimester = ?
                   AND student_id IN (SELECT student_id FROM enrollments WHERE course_id = ?)",
                (locked as i64, trimester.as_str(), &cid),
            )
        }
        (None, Some(sid)) => {
            student_exists(conn, &sid)?;
            conn.execute(
                "UPDATE trimester_grades SET locked = ? WHERE trimester = ? AND student_id = ?",
                (locked as i64, trimester.as_str(), &sid),
            )
        }
        _ => {
            return Err(HandlerErr::bad_params(
                "exactly one of courseId or studentId is required",
            ))
        }
    }
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    tracing::info!(trimester = %trimester, locked, updated, "grading window changed");
    Ok(json!({ "trimester": trimester, "locked": locked, "updated": updated }))
}

/// Records (or clears, with `score: null`) a supplementary exam score.
fn remedial_set(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Edit)?;
    let student_id = req_str(req, "studentId")?;
    if req.params.get("score").is_none() {
        return Err(HandlerErr::bad_params("missing score (use null to clear)"));
    }
    let score = opt_f64(req, "score")?;
    student_exists(conn, &student_id)?;
    let policy = load_policy(conn)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let rows = calc::load_trimester_rows(&tx, &student_id)?;
    let before = calc::compute_standing(&policy, &rows, None)?;
    let annual = match before.annual {
        Some(a) if !a.provisional => a,
        _ => {
            let missing: Vec<Trimester> = Trimester::ALL
                .iter()
                .copied()
                .filter(|t| !rows.iter().any(|r| r.trimester == *t))
                .collect();
            return Err(GradeError::IncompleteData { missing }.into());
        }
    };
    // Refuses scores for non-remedial students and out-of-range scores.
    calc::resolve_remedial(&policy, annual.annual_status, annual.annual_avg, score)?;

    tx.execute(
        "UPDATE annual_grades SET remedial_score = ? WHERE student_id = ?",
        (score, &student_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let standing = recompute_student(&tx, &policy, &student_id)?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    Ok(json!({ "studentId": student_id, "standing": standing_json(&standing) }))
}

fn student_standing(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Read)?;
    let student_id = req_str(req, "studentId")?;
    let policy = load_policy(conn)?;
    let standing = calc::load_student_standing(conn, &policy, &student_id)?;
    Ok(json!({ "studentId": student_id, "standing": standing_json(&standing) }))
}

struct CourseRow {
    national_id: String,
    full_name: String,
    standing: Result<Standing, HandlerErr>,
}

fn course_rows(
    conn: &Connection,
    policy: &GradingPolicy,
    course_id: &str,
) -> Result<Vec<CourseRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.national_id, s.full_name
             FROM enrollments e
             JOIN students s ON s.national_id = e.student_id
             WHERE e.course_id = ?
             ORDER BY s.full_name, s.national_id",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([course_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(students
        .into_iter()
        .map(|(national_id, full_name)| {
            let standing =
                calc::load_student_standing(conn, policy, &national_id).map_err(HandlerErr::from);
            CourseRow {
                national_id,
                full_name,
                standing,
            }
        })
        .collect())
}

fn course_standings(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Read)?;
    let course_id = req_str(req, "courseId")?;
    course_exists(conn, &course_id)?;
    let policy = load_policy(conn)?;
    let rows = course_rows(conn, &policy, &course_id)?;

    let mut approved = 0usize;
    let mut remedial = 0usize;
    let mut failed = 0usize;
    let mut pending = 0usize;
    let mut provisional = 0usize;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = match &row.standing {
            Ok(s) => {
                match (s.annual, s.final_status) {
                    (Some(a), _) if a.provisional => provisional += 1,
                    (_, Some(calc::PassStatus::Approved)) => approved += 1,
                    (_, Some(calc::PassStatus::Failed)) => failed += 1,
                    _ if s.pending => pending += 1,
                    _ => {}
                }
                if s.annual.map(|a| a.annual_status) == Some(calc::AnnualStatus::Remedial) {
                    remedial += 1;
                }
                json!({
                    "nationalId": row.national_id,
                    "fullName": row.full_name,
                    "standing": standing_json(s),
                })
            }
            Err(e) => json!({
                "nationalId": row.national_id,
                "fullName": row.full_name,
                "error": { "code": e.code, "message": e.message },
            }),
        };
        out.push(entry);
    }
    Ok(json!({
        "courseId": course_id,
        "students": out,
        "summary": {
            "approved": approved,
            "failed": failed,
            "remedial": remedial,
            "pending": pending,
            "provisional": provisional,
        },
    }))
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn fmt_2(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_default()
}

fn export_csv(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    guard::require(conn, req, Module::Grades, Action::Read)?;
    let course_id = req_str(req, "courseId")?;
    let out_path = std::path::PathBuf::from(req_str(req, "outPath")?);
    course_exists(conn, &course_id)?;
    let policy = load_policy(conn)?;
    let rows = course_rows(conn, &policy, &course_id)?;

    let mut text = String::from(
        "national_id,full_name,t1,t2,t3,annual_avg,annual_status,remedial_score,final_avg,final_status\n",
    );
    let mut skipped = 0usize;
    for row in &rows {
        let Ok(s) = &row.standing else {
            skipped += 1;
            continue;
        };
        let tri = |t: Trimester| s.trimesters.iter().find(|v| v.trimester == t).map(|v| v.average);
        let annual_status = match s.annual {
            Some(a) if a.provisional => "provisional".to_string(),
            Some(a) => a.annual_status.as_str().to_string(),
            None => String::new(),
        };
        let final_status = if s.pending {
            "pending".to_string()
        } else {
            s.final_status.map(|f| f.as_str().to_string()).unwrap_or_default()
        };
        let fields = [
            csv_quote(&row.national_id),
            csv_quote(&row.full_name),
            fmt_2(tri(Trimester::T1)),
            fmt_2(tri(Trimester::T2)),
            fmt_2(tri(Trimester::T3)),
            fmt_2(s.annual.map(|a| a.annual_avg)),
            annual_status,
            fmt_2(s.remedial_score),
            fmt_2(s.final_avg),
            final_status,
        ];
        text.push_str(&fields.join(","));
        text.push('\n');
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    }
    let mut f = std::fs::File::create(&out_path)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    f.write_all(text.as_bytes())
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "rowsExported": rows.len() - skipped,
        "rowsSkipped": skipped,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "grades.openTrimester" => open_trimester,
            "grades.trimester.get" => trimester_get,
            "grades.trimester.update" => trimester_update,
            "grades.setLocked" => set_locked,
            "grades.remedial.set" => remedial_set,
            "grades.student" => student_standing,
            "grades.course" => course_standings,
            "grades.exportCsv" => export_csv,
            _ => return None,
        };
    let result = require_db(state.db.as_ref()).and_then(|conn| handler(conn, req));
    Some(respond(&req.id, result))
}
