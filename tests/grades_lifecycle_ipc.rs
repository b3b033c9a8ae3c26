mod test_support;

use serde_json::json;
use test_support::{
    bootstrap_admin, enrolled_student, f64_at, fill_trimester, request_err, request_ok,
    spawn_sidecar, str_at, temp_dir,
};

#[test]
fn open_trimester_creates_default_rows_once() {
    let workspace = temp_dir("gradebook-open-trimester");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let course = enrolled_student(&mut stdin, &mut reader, &admin, "0102030405", "Ana Torres");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "1",
        "grades.openTrimester",
        json!({ "courseId": course, "trimester": "T1" }),
    );
    assert_eq!(opened.get("created").and_then(|v| v.as_u64()), Some(1));
    let again = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "2",
        "grades.openTrimester",
        json!({ "courseId": course, "trimester": "T1" }),
    );
    assert_eq!(again.get("created").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(again.get("existing").and_then(|v| v.as_u64()), Some(1));

    let row = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "3",
        "grades.trimester.get",
        json!({ "studentId": "0102030405", "trimester": "T1" }),
    );
    assert_eq!(f64_at(&row, "/trimester/components/ai"), 1.0);
    assert_eq!(f64_at(&row, "/trimester/average"), 1.0);
    assert_eq!(str_at(&row, "/trimester/status"), "failed");

    // With only T1 present the annual figure is provisional and unresolved.
    let standing = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "4",
        "grades.student",
        json!({ "studentId": "0102030405" }),
    );
    assert_eq!(
        standing.pointer("/standing/annual/provisional").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert!(standing.pointer("/standing/finalStatus").is_some_and(|v| v.is_null()));

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "5",
        "grades.trimester.get",
        json!({ "studentId": "0102030405", "trimester": "T2" }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn approved_year_rejects_remedial_score() {
    let workspace = temp_dir("gradebook-approved-year");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let course = enrolled_student(&mut stdin, &mut reader, &admin, "0911111111", "Bruno Vera");
    for t in ["T1", "T2", "T3"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            Some(&admin),
            t,
            "grades.openTrimester",
            json!({ "courseId": course, "trimester": t }),
        );
    }

    let t1 = fill_trimester(&mut stdin, &mut reader, &admin, "0911111111", "T1", 8.0);
    assert_eq!(f64_at(&t1, "/trimester/average"), 8.0);
    assert_eq!(str_at(&t1, "/trimester/status"), "approved");
    let _ = fill_trimester(&mut stdin, &mut reader, &admin, "0911111111", "T2", 7.5);
    let last = fill_trimester(&mut stdin, &mut reader, &admin, "0911111111", "T3", 9.0);

    assert_eq!(f64_at(&last, "/standing/annual/annualAvg"), 8.17);
    assert_eq!(str_at(&last, "/standing/annual/annualStatus"), "approved");
    assert_eq!(str_at(&last, "/standing/finalStatus"), "approved");
    assert_eq!(f64_at(&last, "/standing/finalAvg"), 8.17);

    let (code, error) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "r",
        "grades.remedial.set",
        json!({ "studentId": "0911111111", "score": 6.0 }),
    );
    assert_eq!(code, "not_eligible");
    assert_eq!(
        error.pointer("/details/annualStatus").and_then(|v| v.as_str()),
        Some("approved")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn remedial_year_resolves_with_supplementary_score() {
    let workspace = temp_dir("gradebook-remedial-year");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let course = enrolled_student(&mut stdin, &mut reader, &admin, "1712345678", "Carla Ruiz");

    // Remedial on an incomplete year is refused.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "o1",
        "grades.openTrimester",
        json!({ "courseId": course, "trimester": "T1" }),
    );
    let (code, error) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "early",
        "grades.remedial.set",
        json!({ "studentId": "1712345678", "score": 9.0 }),
    );
    assert_eq!(code, "incomplete_data");
    let missing = error
        .pointer("/details/missing")
        .and_then(|v| v.as_array())
        .expect("missing list");
    assert_eq!(missing, &vec![json!("T2"), json!("T3")]);

    for t in ["T2", "T3"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            Some(&admin),
            t,
            "grades.openTrimester",
            json!({ "courseId": course, "trimester": t }),
        );
    }
    for t in ["T1", "T2", "T3"] {
        let _ = fill_trimester(&mut stdin, &mut reader, &admin, "1712345678", t, 6.0);
    }

    let standing = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "s1",
        "grades.student",
        json!({ "studentId": "1712345678" }),
    );
    assert_eq!(str_at(&standing, "/standing/annual/annualStatus"), "remedial");
    assert_eq!(
        standing.pointer("/standing/pending").and_then(|v| v.as_bool()),
        Some(true)
    );

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "bad",
        "grades.remedial.set",
        json!({ "studentId": "1712345678", "score": 10.5 }),
    );
    assert_eq!(code, "validation_error");

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "r",
        "grades.remedial.set",
        json!({ "studentId": "1712345678", "score": 9.0 }),
    );
    assert_eq!(f64_at(&resolved, "/standing/remedialScore"), 9.0);
    assert_eq!(f64_at(&resolved, "/standing/finalAvg"), 7.5);
    assert_eq!(str_at(&resolved, "/standing/finalStatus"), "approved");
    assert_eq!(
        resolved.pointer("/standing/pending").and_then(|v| v.as_bool()),
        Some(false)
    );

    // Clearing the score puts the student back to pending.
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "clear",
        "grades.remedial.set",
        json!({ "studentId": "1712345678", "score": null }),
    );
    assert!(cleared.pointer("/standing/finalStatus").is_some_and(|v| v.is_null()));
    assert_eq!(
        cleared.pointer("/standing/pending").and_then(|v| v.as_bool()),
        Some(true)
    );

    let course_view = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "c",
        "grades.course",
        json!({ "courseId": course }),
    );
    assert_eq!(
        course_view.pointer("/summary/pending").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        course_view.pointer("/summary/remedial").and_then(|v| v.as_u64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn out_of_range_component_leaves_row_unchanged() {
    let workspace = temp_dir("gradebook-component-range");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let course = enrolled_student(&mut stdin, &mut reader, &admin, "0603030303", "Diego Paz");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "o",
        "grades.openTrimester",
        json!({ "courseId": course, "trimester": "T1" }),
    );
    let _ = fill_trimester(&mut stdin, &mut reader, &admin, "0603030303", "T1", 8.0);

    let (code, error) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "bad",
        "grades.trimester.update",
        json!({
            "studentId": "0603030303",
            "trimester": "T1",
            "components": { "ex": 5.0, "ai": 10.5 },
        }),
    );
    assert_eq!(code, "validation_error");
    assert_eq!(
        error.pointer("/details/field").and_then(|v| v.as_str()),
        Some("ai")
    );

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "unknown",
        "grades.trimester.update",
        json!({
            "studentId": "0603030303",
            "trimester": "T1",
            "components": { "bonus": 5.0 },
        }),
    );
    assert_eq!(code, "bad_params");

    let row = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "get",
        "grades.trimester.get",
        json!({ "studentId": "0603030303", "trimester": "T1" }),
    );
    assert_eq!(f64_at(&row, "/trimester/components/ex"), 8.0);
    assert_eq!(f64_at(&row, "/trimester/average"), 8.0);

    // A single-component patch keeps the other four.
    let patched = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "one",
        "grades.trimester.update",
        json!({
            "studentId": "0603030303",
            "trimester": "T1",
            "components": { "ex": 3.0 },
        }),
    );
    assert_eq!(f64_at(&patched, "/trimester/average"), 7.0);
    assert_eq!(str_at(&patched, "/trimester/status"), "approved");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn locked_trimester_refuses_edits_until_reopened() {
    let workspace = temp_dir("gradebook-locked");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let course = enrolled_student(&mut stdin, &mut reader, &admin, "1300000001", "Elena Mora");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "o",
        "grades.openTrimester",
        json!({ "courseId": course, "trimester": "T1" }),
    );

    let locked = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "lock",
        "grades.setLocked",
        json!({ "courseId": course, "trimester": "T1", "locked": true }),
    );
    assert_eq!(locked.get("updated").and_then(|v| v.as_u64()), Some(1));

    let (code, error) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "edit",
        "grades.trimester.update",
        json!({
            "studentId": "1300000001",
            "trimester": "T1",
            "components": { "ai": 9.0 },
        }),
    );
    assert_eq!(code, "locked");
    assert_eq!(
        error.pointer("/details/trimester").and_then(|v| v.as_str()),
        Some("T1")
    );

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "both",
        "grades.setLocked",
        json!({ "courseId": course, "studentId": "1300000001", "trimester": "T1", "locked": false }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "unlock",
        "grades.setLocked",
        json!({ "studentId": "1300000001", "trimester": "T1", "locked": false }),
    );
    let edited = fill_trimester(&mut stdin, &mut reader, &admin, "1300000001", "T1", 9.0);
    assert_eq!(f64_at(&edited, "/trimester/average"), 9.0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn csv_export_lists_enrolled_students() {
    let workspace = temp_dir("gradebook-csv-export");
    let csv_out = workspace.join("exports").join("course.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = bootstrap_admin(&mut stdin, &mut reader, &workspace);
    let course = enrolled_student(&mut stdin, &mut reader, &admin, "0200000002", "Ortiz, Fabiola");
    for t in ["T1", "T2", "T3"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            Some(&admin),
            t,
            "grades.openTrimester",
            json!({ "courseId": course, "trimester": t }),
        );
        let _ = fill_trimester(&mut stdin, &mut reader, &admin, "0200000002", t, 4.0);
    }

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        Some(&admin),
        "csv",
        "grades.exportCsv",
        json!({ "courseId": course, "outPath": csv_out.to_string_lossy() }),
    );
    assert_eq!(exported.get("rowsExported").and_then(|v| v.as_u64()), Some(1));

    let text = std::fs::read_to_string(&csv_out).expect("read csv");
    let mut lines = text.lines();
    assert!(lines.next().expect("header").starts_with("national_id,full_name,t1"));
    assert_eq!(
        lines.next().expect("row"),
        "0200000002,\"Ortiz, Fabiola\",4.00,4.00,4.00,4.00,failed,,4.00,failed"
    );

    let _ = std::fs::remove_dir_all(workspace);
}
