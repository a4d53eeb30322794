use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "schooldesk.sqlite3";

pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS campuses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            short_code TEXT,
            address TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            campus_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL DEFAULT 'teacher',
            avatar_kind TEXT NOT NULL DEFAULT 'initials',
            avatar_value TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    // Workspaces created before avatars shipped lack the avatar columns.
    ensure_teachers_avatar_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_campus ON teachers(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curricula(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subject TEXT,
            grade_level TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_curricula_campus ON curricula(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            curriculum_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            standards_json TEXT NOT NULL DEFAULT '[]',
            quarter INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(curriculum_id) REFERENCES curricula(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_curriculum ON lessons(curriculum_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_curriculum_sort ON lessons(curriculum_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            curriculum_id TEXT NOT NULL,
            campus_id TEXT NOT NULL,
            school_year TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(curriculum_id) REFERENCES curricula(id),
            FOREIGN KEY(campus_id) REFERENCES campuses(id),
            UNIQUE(teacher_id, curriculum_id, campus_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON assignments(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_campus ON assignments(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_grades(
            assignment_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(assignment_id, code),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id)
        )",
        [],
    )?;

    // Progress rows deliberately carry no foreign keys: they mirror the original
    // document store, where a referenced lesson or curriculum may no longer exist.
    // The calendar projection renders such rows with fallback display names.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_progress(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            curriculum_id TEXT NOT NULL,
            campus_id TEXT NOT NULL,
            grade_code TEXT,
            quarter INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'not_started',
            evidence_storage_id TEXT,
            evidence_content_type TEXT,
            photo_storage_id TEXT,
            scheduled_date TEXT,
            completed_at TEXT,
            is_verified INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_progress_version(&conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_lesson_progress_identity
         ON lesson_progress(teacher_id, lesson_id, COALESCE(grade_code, ''))",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_progress_teacher ON lesson_progress(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_progress_teacher_scheduled
         ON lesson_progress(teacher_id, scheduled_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evidence_blobs(
            storage_id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            checksum_sha256 TEXT NOT NULL,
            original_name TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_teachers_avatar_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "teachers", "avatar_kind")? {
        conn.execute(
            "ALTER TABLE teachers ADD COLUMN avatar_kind TEXT NOT NULL DEFAULT 'initials'",
            [],
        )?;
    }
    if !table_has_column(conn, "teachers", "avatar_value")? {
        conn.execute(
            "ALTER TABLE teachers ADD COLUMN avatar_value TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    Ok(())
}

fn ensure_progress_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lesson_progress", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lesson_progress ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
