mod test_support;

use serde_json::json;
use test_support::{
    bootstrap_admin, read_response, request_as, request_err, request_ok, spawn_sidecar, temp_dir,
};
use std::io::Write;

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, None, "h", "health", json!({}));
    assert!(health.get("workspacePath").is_some_and(|v| v.is_null()));

    // Everything but health and workspace.select needs an open workspace.
    let (code, _) = request_err(&mut stdin, &mut reader, None, "nows", "students.list", json!({}));
    assert_eq!(code, "no_workspace");

    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);

    for (i, method) in [
        "users.list",
        "students.list",
        "courses.list",
        "setup.grading.get",
    ]
    .iter()
    .enumerate()
    {
        let value = request_as(
            &mut stdin,
            &mut reader,
            Some(&admin),
            &format!("m{}", i),
            method,
            json!({}),
        );
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} -> {}",
            method,
            value
        );
    }

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "unknown",
        "grades.teleport",
        json!({}),
    );
    assert_eq!(code, "not_implemented");

    writeln!(stdin, "{{ not json").expect("write bad json");
    stdin.flush().expect("flush");
    let bad = read_response(&mut reader);
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        bad.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    // still serving after a bad line
    let _ = request_ok(&mut stdin, &mut reader, None, "h2", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
