use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use crate::policy::{GradingPolicy, GRADING_POLICY_KEY};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            national_id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            gender TEXT NOT NULL CHECK(gender IN ('male', 'female')),
            grade_level TEXT NOT NULL,
            parallel TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'teacher', 'student')),
            student_id TEXT UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(national_id) ON DELETE SET NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permissions(
            user_id TEXT NOT NULL,
            module TEXT NOT NULL
                CHECK(module IN ('inventory', 'grades', 'accessibility', 'maintenance')),
            can_read INTEGER NOT NULL DEFAULT 0,
            can_edit INTEGER NOT NULL DEFAULT 0,
            can_create INTEGER NOT NULL DEFAULT 0,
            can_delete INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(user_id, module),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            parallel TEXT NOT NULL,
            school_year TEXT NOT NULL,
            UNIQUE(grade_level, parallel, school_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(national_id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    // Components default to the bottom of the scale; average/status are
    // rewritten from them on every edit.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS trimester_grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            trimester TEXT NOT NULL CHECK(trimester IN ('T1', 'T2', 'T3')),
            ai REAL NOT NULL DEFAULT 1.00,
            ag REAL NOT NULL DEFAULT 1.00,
            rp REAL NOT NULL DEFAULT 1.00,
            pi REAL NOT NULL DEFAULT 1.00,
            ex REAL NOT NULL DEFAULT 1.00,
            average REAL NOT NULL DEFAULT 1.00,
            status TEXT NOT NULL DEFAULT 'failed' CHECK(status IN ('approved', 'failed')),
            locked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(student_id, trimester),
            FOREIGN KEY(student_id) REFERENCES students(national_id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trimester_grades_student ON trimester_grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS annual_grades(
            student_id TEXT PRIMARY KEY,
            annual_avg REAL NOT NULL DEFAULT 0.00,
            annual_status TEXT NOT NULL DEFAULT 'failed'
                CHECK(annual_status IN ('approved', 'remedial', 'failed')),
            remedial_score REAL,
            final_avg REAL,
            final_status TEXT CHECK(final_status IN ('approved', 'failed')),
            provisional INTEGER NOT NULL DEFAULT 1,
            pending INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(national_id) ON DELETE CASCADE
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read setting {}", key))?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("setting {} is not valid JSON", key))?;
    Ok(Some(value))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )
    .with_context(|| format!("failed to write setting {}", key))?;
    Ok(())
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The workspace's grading policy, or the defaults when none was saved.
pub fn grading_policy(conn: &Connection) -> anyhow::Result<GradingPolicy> {
    let Some(v) = settings_get_json(conn, GRADING_POLICY_KEY)? else {
        return Ok(GradingPolicy::default());
    };
    let policy: GradingPolicy =
        serde_json::from_value(v).context("stored grading policy is malformed")?;
    policy.validate()?;
    Ok(policy)
}
