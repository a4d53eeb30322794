use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STATUS_NOT_STARTED: &str = "not_started";

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

const PROGRESS_COLUMNS: &str = "id, teacher_id, lesson_id, assignment_id, curriculum_id,
        campus_id, grade_code, quarter, status, evidence_storage_id, evidence_content_type,
        photo_storage_id, scheduled_date, completed_at, is_verified, version,
        created_at, updated_at";

fn progress_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "teacherId": r.get::<_, String>(1)?,
        "lessonId": r.get::<_, String>(2)?,
        "assignmentId": r.get::<_, String>(3)?,
        "curriculumId": r.get::<_, String>(4)?,
        "campusId": r.get::<_, String>(5)?,
        "gradeCode": r.get::<_, Option<String>>(6)?,
        "quarter": r.get::<_, i64>(7)?,
        "status": r.get::<_, String>(8)?,
        "evidenceStorageId": r.get::<_, Option<String>>(9)?,
        "evidenceContentType": r.get::<_, Option<String>>(10)?,
        "photoStorageId": r.get::<_, Option<String>>(11)?,
        "scheduledDate": r.get::<_, Option<String>>(12)?,
        "completedAt": r.get::<_, Option<String>>(13)?,
        "isVerified": r.get::<_, i64>(14)? != 0,
        "version": r.get::<_, i64>(15)?,
        "createdAt": r.get::<_, String>(16)?,
        "updatedAt": r.get::<_, String>(17)?,
    }))
}

fn handle_progress_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_code = opt_str(req, "gradeCode");

    let sql = format!(
        "SELECT {} FROM lesson_progress
         WHERE teacher_id = ? AND lesson_id = ? AND COALESCE(grade_code, '') = COALESCE(?, '')",
        PROGRESS_COLUMNS
    );
    let row = conn
        .query_row(&sql, params![teacher_id, lesson_id, grade_code], |r| {
            progress_row_json(r)
        })
        .optional();
    match row {
        Ok(Some(record)) => ok(&req.id, json!({ "record": record })),
        Ok(None) => err(&req.id, "not_found", "progress record not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_progress_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = format!(
        "SELECT {} FROM lesson_progress WHERE teacher_id = ? ORDER BY created_at, id",
        PROGRESS_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records = match stmt
        .query_map([&teacher_id], |r| progress_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "records": records }))
}

struct AssignmentMeta {
    curriculum_id: String,
    campus_id: String,
    grade_codes: Vec<String>,
}

fn load_assignment_meta(
    conn: &Connection,
    assignment_id: &str,
) -> Result<Option<AssignmentMeta>, rusqlite::Error> {
    let head = conn
        .query_row(
            "SELECT curriculum_id, campus_id FROM assignments WHERE id = ?",
            [assignment_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()?;
    let Some((curriculum_id, campus_id)) = head else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT code FROM assignment_grades WHERE assignment_id = ? ORDER BY sort_order, code",
    )?;
    let grade_codes = stmt
        .query_map([assignment_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(AssignmentMeta {
        curriculum_id,
        campus_id,
        grade_codes,
    }))
}

fn lesson_quarter(conn: &Connection, lesson_id: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT quarter FROM lessons WHERE id = ?",
        [lesson_id],
        |r| r.get(0),
    )
    .optional()
}

fn handle_progress_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_code = opt_str(req, "gradeCode");

    let scheduled_date = match req.params.get("scheduledDate") {
        None => return err(&req.id, "bad_params", "missing scheduledDate", None),
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_err() {
                    return err(
                        &req.id,
                        "bad_params",
                        "scheduledDate must be YYYY-MM-DD",
                        None,
                    );
                }
                Some(raw.to_string())
            }
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "scheduledDate must be YYYY-MM-DD or null",
                    None,
                )
            }
        },
    };

    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let meta = match load_assignment_meta(conn, &assignment_id) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Single-section assignments store no grade code; the section is implied.
    let stored_grade = if meta.grade_codes.len() > 1 {
        let Some(code) = grade_code else {
            return err(
                &req.id,
                "bad_params",
                "gradeCode is required for a multi-section assignment",
                None,
            );
        };
        if !meta.grade_codes.iter().any(|c| *c == code) {
            return err(
                &req.id,
                "bad_params",
                format!("gradeCode {} is not part of the assignment", code),
                None,
            );
        }
        Some(code)
    } else {
        None
    };

    let existing = conn
        .query_row(
            "SELECT id, version FROM lesson_progress
             WHERE teacher_id = ? AND lesson_id = ? AND COALESCE(grade_code, '') = COALESCE(?, '')",
            params![teacher_id, lesson_id, stored_grade],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )
        .optional();
    match existing {
        Ok(Some((progress_id, version))) => {
            let updated = conn.execute(
                "UPDATE lesson_progress
                 SET scheduled_date = ?, updated_at = ?, version = version + 1
                 WHERE id = ? AND version = ?",
                params![scheduled_date, db::now_iso(), progress_id, version],
            );
            match updated {
                Ok(0) => err(
                    &req.id,
                    "conflict",
                    "progress record changed concurrently",
                    None,
                ),
                Ok(_) => ok(&req.id, json!({ "progressId": progress_id })),
                Err(e) => err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "lesson_progress" })),
                ),
            }
        }
        Ok(None) => {
            let Some(date) = scheduled_date else {
                return err(&req.id, "not_found", "progress record not found", None);
            };
            let quarter = match lesson_quarter(conn, &lesson_id) {
                Ok(q) => q.unwrap_or(1),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };

            let progress_id = Uuid::new_v4().to_string();
            let now = db::now_iso();
            let inserted = conn.execute(
                "INSERT INTO lesson_progress(id, teacher_id, lesson_id, assignment_id,
                        curriculum_id, campus_id, grade_code, quarter, status,
                        scheduled_date, is_verified, version, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
                params![
                    progress_id,
                    teacher_id,
                    lesson_id,
                    assignment_id,
                    meta.curriculum_id,
                    meta.campus_id,
                    stored_grade,
                    quarter,
                    STATUS_NOT_STARTED,
                    date,
                    now,
                    now
                ],
            );
            match inserted {
                Ok(_) => ok(&req.id, json!({ "progressId": progress_id })),
                Err(e) => err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "lesson_progress" })),
                ),
            }
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_progress_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let progress_id = match required_str(req, "progressId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(is_verified) = req.params.get("isVerified").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "isVerified must be boolean", None);
    };

    let updated = conn.execute(
        "UPDATE lesson_progress
         SET is_verified = ?, updated_at = ?, version = version + 1
         WHERE id = ?",
        params![is_verified as i64, db::now_iso(), progress_id],
    );
    match updated {
        Ok(0) => err(&req.id, "not_found", "progress record not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "lesson_progress" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.get" => Some(handle_progress_get(state, req)),
        "progress.list" => Some(handle_progress_list(state, req)),
        "progress.schedule" => Some(handle_progress_schedule(state, req)),
        "progress.verify" => Some(handle_progress_verify(state, req)),
        _ => None,
    }
}
