mod test_support;

use serde_json::json;
use test_support::{
    bootstrap_admin, enrolled_student, request_err, request_ok, spawn_sidecar, temp_dir,
};

#[test]
fn teacher_without_rows_is_denied_until_granted() {
    let workspace = temp_dir("gradebook-permissions-grant");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let _ = enrolled_student(&mut stdin, &mut reader, &admin, "0101010101", "Gabriel Sanz");

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "1",
        "users.create",
        json!({ "username": "mlopez", "displayName": "M. Lopez", "role": "teacher" }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("teacher id")
    .to_string();

    let (code, error) = request_err(
        &mut stdin,
        &mut reader,
        Some(&teacher),
        "2",
        "grades.student",
        json!({ "studentId": "0101010101" }),
    );
    assert_eq!(code, "forbidden");
    assert_eq!(
        error.pointer("/details/module").and_then(|v| v.as_str()),
        Some("grades")
    );

    let check = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "3",
        "permissions.check",
        json!({ "userId": teacher, "module": "grades", "action": "delete" }),
    );
    assert_eq!(check.get("allowed").and_then(|v| v.as_bool()), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "4",
        "permissions.set",
        json!({ "userId": teacher, "module": "grades", "read": true }),
    );
    let standing = request_ok(
        &mut stdin,
        &mut reader,
        Some(&teacher),
        "5",
        "grades.student",
        json!({ "studentId": "0101010101" }),
    );
    assert!(standing.pointer("/standing/annual").is_some_and(|v| v.is_null()));

    // read does not imply edit
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&teacher),
        "6",
        "grades.trimester.update",
        json!({ "studentId": "0101010101", "trimester": "T1", "components": { "ai": 9.0 } }),
    );
    assert_eq!(code, "forbidden");

    // nor does it reach another module
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&teacher),
        "7",
        "students.list",
        json!({}),
    );
    assert_eq!(code, "forbidden");

    // a later patch keeps the capabilities it does not mention
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "8",
        "permissions.set",
        json!({ "userId": teacher, "module": "grades", "edit": true }),
    );
    assert_eq!(
        updated.pointer("/permission/read").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        updated.pointer("/permission/edit").and_then(|v| v.as_bool()),
        Some(true)
    );

    let revoked = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "9",
        "permissions.revoke",
        json!({ "userId": teacher, "module": "grades" }),
    );
    assert_eq!(revoked.get("removed").and_then(|v| v.as_bool()), Some(true));
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&teacher),
        "10",
        "grades.student",
        json!({ "studentId": "0101010101" }),
    );
    assert_eq!(code, "forbidden");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn admin_is_allowed_everything_without_rows() {
    let workspace = temp_dir("gradebook-permissions-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);

    for (i, module) in ["inventory", "grades", "accessibility", "maintenance"]
        .iter()
        .enumerate()
    {
        for action in ["read", "edit", "create", "delete"] {
            let check = request_ok(
                &mut stdin,
                &mut reader,
                Some(&admin),
                &format!("{}-{}", i, action),
                "permissions.check",
                json!({ "userId": admin, "module": module, "action": action }),
            );
            assert_eq!(check.get("allowed").and_then(|v| v.as_bool()), Some(true));
        }
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "list",
        "permissions.list",
        json!({ "userId": admin }),
    );
    assert_eq!(listed.get("implicitAll").and_then(|v| v.as_bool()), Some(true));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn actor_is_required_once_users_exist() {
    let workspace = temp_dir("gradebook-permissions-actor");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        None,
        "1",
        "users.create",
        json!({ "username": "intruder", "role": "admin" }),
    );
    assert_eq!(code, "unauthorized");

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some("no-such-user"),
        "2",
        "students.list",
        json!({}),
    );
    assert_eq!(code, "unauthorized");

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "3",
        "users.delete",
        json!({ "userId": admin }),
    );
    assert_eq!(code, "conflict");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn first_user_must_be_admin() {
    let workspace = temp_dir("gradebook-permissions-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        None,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        None,
        "2",
        "users.create",
        json!({ "username": "teacher", "role": "teacher" }),
    );
    assert_eq!(code, "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn linked_student_account_cannot_become_staff_with_its_link() {
    let workspace = temp_dir("gradebook-permissions-student-link");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let _ = enrolled_student(&mut stdin, &mut reader, &admin, "0909090909", "Ana Cedeno");

    let ana = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "1",
        "users.create",
        json!({ "username": "ana", "role": "student", "studentId": "0909090909" }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("student user id")
    .to_string();

    for (id, role) in [("2", "teacher"), ("3", "admin")] {
        let (code, _) = request_err(
            &mut stdin,
            &mut reader,
            Some(&admin),
            id,
            "users.update",
            json!({ "userId": ana, "role": role, "studentId": "0909090909" }),
        );
        assert_eq!(code, "bad_params", "promotion to {}", role);
    }

    let listed = request_ok(&mut stdin, &mut reader, Some(&admin), "4", "users.list", json!({}));
    let row = listed
        .get("users")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|u| u.get("id").and_then(|v| v.as_str()) == Some(ana.as_str()))
        })
        .cloned()
        .expect("ana listed");
    assert_eq!(row.get("role").and_then(|v| v.as_str()), Some("student"));
    assert_eq!(
        row.get("studentId").and_then(|v| v.as_str()),
        Some("0909090909")
    );

    // Dropping the link in the same update is accepted.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "5",
        "users.update",
        json!({ "userId": ana, "role": "teacher", "studentId": null }),
    );
    let listed = request_ok(&mut stdin, &mut reader, Some(&admin), "6", "users.list", json!({}));
    let row = listed
        .get("users")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|u| u.get("id").and_then(|v| v.as_str()) == Some(ana.as_str()))
        })
        .cloned()
        .expect("ana listed");
    assert_eq!(row.get("role").and_then(|v| v.as_str()), Some("teacher"));
    assert!(row.get("studentId").is_some_and(|v| v.is_null()));

    let _ = std::fs::remove_dir_all(workspace);
}
