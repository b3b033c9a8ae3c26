#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

/// Sends one request as `actor` (or anonymously) and returns the raw response.
pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    actor: Option<&str>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(a) = actor {
        payload["actor"] = json!(a);
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    actor: Option<&str>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_as(stdin, reader, actor, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Expects a failure and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    actor: Option<&str>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> (String, serde_json::Value) {
    let value = request_as(stdin, reader, actor, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let error = value.get("error").cloned().unwrap_or_else(|| json!({}));
    let code = error
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    (code, error)
}

/// Selects a fresh workspace and creates its first admin. Returns the admin id.
pub fn bootstrap_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        None,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        None,
        "admin",
        "users.create",
        json!({ "username": "admin", "role": "admin" }),
    );
    created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("admin userId")
        .to_string()
}

/// Creates a student, a course for its grade, and enrolls the student.
/// Returns the course id.
pub fn enrolled_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin: &str,
    national_id: &str,
    full_name: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        Some(admin),
        "student",
        "students.create",
        json!({
            "nationalId": national_id,
            "fullName": full_name,
            "gender": "female",
            "gradeLevel": "8",
            "parallel": "A",
        }),
    );
    let listed = request_ok(stdin, reader, Some(admin), "courses", "courses.list", json!({}));
    let existing = listed
        .get("courses")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let course_id = match existing {
        Some(id) => id,
        None => request_ok(
            stdin,
            reader,
            Some(admin),
            "course",
            "courses.create",
            json!({ "gradeLevel": "8", "parallel": "A", "schoolYear": "2025-2026" }),
        )
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string(),
    };
    let _ = request_ok(
        stdin,
        reader,
        Some(admin),
        "enroll",
        "enrollment.set",
        json!({ "studentId": national_id, "courseId": course_id }),
    );
    course_id
}

/// Sets all five components of one trimester to `value`.
pub fn fill_trimester(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    actor: &str,
    student_id: &str,
    trimester: &str,
    value: f64,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        Some(actor),
        "fill",
        "grades.trimester.update",
        json!({
            "studentId": student_id,
            "trimester": trimester,
            "components": { "ai": value, "ag": value, "rp": value, "pi": value, "ex": value },
        }),
    )
}

pub fn f64_at(v: &serde_json::Value, pointer: &str) -> f64 {
    v.pointer(pointer)
        .and_then(|x| x.as_f64())
        .unwrap_or_else(|| panic!("missing number at {} in {}", pointer, v))
}

pub fn str_at<'a>(v: &'a serde_json::Value, pointer: &str) -> &'a str {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
}
