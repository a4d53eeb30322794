use crate::archive;
use crate::db;
use crate::evidence_store;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STATUS_NOT_STARTED: &str = "not_started";
const STATUS_COMPLETED: &str = "completed";

const DEFAULT_MAX_FILE_SIZE_MB: i64 = 25;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn workspace<'a>(state: &'a AppState, req: &Request) -> Result<&'a Path, serde_json::Value> {
    state
        .workspace
        .as_deref()
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

fn required_storage_id(req: &Request) -> Result<String, serde_json::Value> {
    let raw = required_str(req, "storageId")?;
    evidence_store::parse_storage_id(&raw)
        .ok_or_else(|| err(&req.id, "bad_params", "storageId must be a UUID", None))
}

struct AssignmentMeta {
    curriculum_id: String,
    campus_id: String,
    grades: Vec<(String, String)>,
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
        "SELECT code, name FROM assignment_grades WHERE assignment_id = ? ORDER BY sort_order, code",
    )?;
    let grades = stmt
        .query_map([assignment_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(AssignmentMeta {
        curriculum_id,
        campus_id,
        grades,
    }))
}

/// Grade codes already holding document evidence for this teacher+lesson.
fn evidence_grade_codes(
    conn: &Connection,
    teacher_id: &str,
    lesson_id: &str,
) -> Result<HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT grade_code FROM lesson_progress
         WHERE teacher_id = ? AND lesson_id = ? AND evidence_storage_id IS NOT NULL",
    )?;
    let codes = stmt
        .query_map(params![teacher_id, lesson_id], |r| {
            r.get::<_, Option<String>>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(codes.into_iter().flatten().collect())
}

struct ProgressHead {
    id: String,
    version: i64,
    evidence_storage_id: Option<String>,
    photo_storage_id: Option<String>,
}

fn find_progress(
    conn: &Connection,
    teacher_id: &str,
    lesson_id: &str,
    grade_code: Option<&str>,
) -> Result<Option<ProgressHead>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, version, evidence_storage_id, photo_storage_id FROM lesson_progress
         WHERE teacher_id = ? AND lesson_id = ? AND COALESCE(grade_code, '') = COALESCE(?, '')",
        params![teacher_id, lesson_id, grade_code],
        |r| {
            Ok(ProgressHead {
                id: r.get(0)?,
                version: r.get(1)?,
                evidence_storage_id: r.get(2)?,
                photo_storage_id: r.get(3)?,
            })
        },
    )
    .optional()
}

fn max_file_size_bytes(conn: &Connection) -> u64 {
    let configured = db::settings_get_json(conn, "setup.evidence")
        .ok()
        .flatten()
        .and_then(|v| v.get("maxFileSizeMb").and_then(|m| m.as_i64()))
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_FILE_SIZE_MB);
    (configured as u64) * 1024 * 1024
}

/// Validate the staged upload and record its metadata. Returns the byte size.
fn ingest_staged_blob(
    workspace: &Path,
    conn: &Connection,
    req: &Request,
    storage_id: &str,
    content_type: &str,
    file_name: Option<&str>,
) -> Result<u64, serde_json::Value> {
    let size = match evidence_store::stat_object(workspace, storage_id) {
        Ok(Some(size)) => size,
        Ok(None) => {
            return Err(err(
                &req.id,
                "bad_params",
                "no file was uploaded to the target",
                None,
            ))
        }
        Err(e) => return Err(err(&req.id, "evidence_store_failed", e.to_string(), None)),
    };
    if size == 0 {
        return Err(err(&req.id, "bad_params", "uploaded file is empty", None));
    }
    let cap = max_file_size_bytes(conn);
    if size > cap {
        return Err(err(
            &req.id,
            "bad_params",
            format!("file exceeds the {} byte limit", cap),
            Some(json!({ "sizeBytes": size })),
        ));
    }
    let (_, checksum) = match evidence_store::checksum_object(workspace, storage_id) {
        Ok(v) => v,
        Err(e) => return Err(err(&req.id, "evidence_store_failed", e.to_string(), None)),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO evidence_blobs(storage_id, content_type, size_bytes, checksum_sha256,
                                    original_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![
            storage_id,
            content_type,
            size as i64,
            checksum,
            file_name,
            db::now_iso()
        ],
    ) {
        let _ = evidence_store::delete_object(workspace, storage_id);
        return Err(err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "evidence_blobs" })),
        ));
    }
    Ok(size)
}

/// Best-effort removal of an object no record references: the compensation
/// step after a failed record write, and cleanup of a replaced upload.
fn remove_unreferenced_blob(workspace: &Path, conn: &Connection, storage_id: &str) {
    let _ = evidence_store::delete_object(workspace, storage_id);
    let _ = conn.execute(
        "DELETE FROM evidence_blobs WHERE storage_id = ?",
        [storage_id],
    );
}

fn handle_upload_target(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match workspace(state, req) {
        Ok(w) => w,
        Err(e) => return e,
    };
    match evidence_store::allocate_upload_target(workspace) {
        Ok(target) => ok(
            &req.id,
            json!({
                "storageId": target.storage_id,
                "uploadPath": target.path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "evidence_store_failed", e.to_string(), None),
    }
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(w) => w.to_path_buf(),
        Err(e) => return e,
    };
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
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let storage_id = match required_storage_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content_type = match required_str(req, "contentType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let file_name = opt_str(req, "fileName");
    let grade_code = opt_str(req, "gradeCode");
    let expected_version = req.params.get("expectedVersion").and_then(|v| v.as_i64());

    let meta = match load_assignment_meta(conn, &assignment_id) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Multi-section assignments require picking a section that does not hold
    // evidence yet; single-section assignments imply the section and store no
    // grade code on the record.
    let stored_grade = if meta.grades.len() > 1 {
        let Some(code) = grade_code else {
            return err(
                &req.id,
                "bad_params",
                "gradeCode is required for a multi-section assignment",
                None,
            );
        };
        if !meta.grades.iter().any(|(c, _)| *c == code) {
            return err(
                &req.id,
                "bad_params",
                format!("gradeCode {} is not part of the assignment", code),
                None,
            );
        }
        let used = match evidence_grade_codes(conn, &teacher_id, &lesson_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if used.contains(&code) {
            return err(
                &req.id,
                "bad_params",
                format!("grade section {} already has evidence", code),
                None,
            );
        }
        Some(code)
    } else {
        None
    };

    let existing = match find_progress(conn, &teacher_id, &lesson_id, stored_grade.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let (Some(expected), Some(record)) = (expected_version, existing.as_ref()) {
        if record.version != expected {
            return err(
                &req.id,
                "conflict",
                "progress record changed since it was read",
                Some(json!({ "version": record.version })),
            );
        }
    }

    if let Err(e) = ingest_staged_blob(
        &ws,
        conn,
        req,
        &storage_id,
        &content_type,
        file_name.as_deref(),
    ) {
        return e;
    }

    let now = db::now_iso();
    match existing {
        Some(record) => {
            let updated = conn.execute(
                "UPDATE lesson_progress
                 SET evidence_storage_id = ?, evidence_content_type = ?, status = ?,
                     completed_at = ?, updated_at = ?, version = version + 1
                 WHERE id = ? AND version = ?",
                params![
                    storage_id,
                    content_type,
                    STATUS_COMPLETED,
                    now,
                    now,
                    record.id,
                    record.version
                ],
            );
            match updated {
                Ok(0) => {
                    remove_unreferenced_blob(&ws, conn, &storage_id);
                    err(
                        &req.id,
                        "conflict",
                        "progress record changed since it was read",
                        None,
                    )
                }
                Ok(_) => {
                    if let Some(ref old) = record.evidence_storage_id {
                        if *old != storage_id {
                            remove_unreferenced_blob(&ws, conn, old);
                        }
                    }
                    ok(
                        &req.id,
                        json!({
                            "progressId": record.id,
                            "storageId": storage_id,
                            "version": record.version + 1,
                        }),
                    )
                }
                Err(e) => {
                    remove_unreferenced_blob(&ws, conn, &storage_id);
                    err(
                        &req.id,
                        "db_update_failed",
                        e.to_string(),
                        Some(json!({ "table": "lesson_progress" })),
                    )
                }
            }
        }
        None => {
            let quarter: i64 = match conn
                .query_row(
                    "SELECT quarter FROM lessons WHERE id = ?",
                    [&lesson_id],
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(q) => q.unwrap_or(1),
                Err(e) => {
                    remove_unreferenced_blob(&ws, conn, &storage_id);
                    return err(&req.id, "db_query_failed", e.to_string(), None);
                }
            };
            let progress_id = Uuid::new_v4().to_string();
            let inserted = conn.execute(
                "INSERT INTO lesson_progress(id, teacher_id, lesson_id, assignment_id,
                        curriculum_id, campus_id, grade_code, quarter, status,
                        evidence_storage_id, evidence_content_type, completed_at,
                        is_verified, version, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
                params![
                    progress_id,
                    teacher_id,
                    lesson_id,
                    assignment_id,
                    meta.curriculum_id,
                    meta.campus_id,
                    stored_grade,
                    quarter,
                    STATUS_COMPLETED,
                    storage_id,
                    content_type,
                    now,
                    now,
                    now
                ],
            );
            match inserted {
                Ok(_) => ok(
                    &req.id,
                    json!({
                        "progressId": progress_id,
                        "storageId": storage_id,
                        "version": 0,
                    }),
                ),
                Err(e) => {
                    remove_unreferenced_blob(&ws, conn, &storage_id);
                    err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "lesson_progress" })),
                    )
                }
            }
        }
    }
}

fn handle_attach_photo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(w) => w.to_path_buf(),
        Err(e) => return e,
    };
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
    let storage_id = match required_storage_id(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content_type = match required_str(req, "contentType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let file_name = opt_str(req, "fileName");
    let grade_code = opt_str(req, "gradeCode");

    let record = match find_progress(conn, &teacher_id, &lesson_id, grade_code.as_deref()) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "progress record not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = ingest_staged_blob(
        &ws,
        conn,
        req,
        &storage_id,
        &content_type,
        file_name.as_deref(),
    ) {
        return e;
    }

    let updated = conn.execute(
        "UPDATE lesson_progress
         SET photo_storage_id = ?, updated_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
        params![storage_id, db::now_iso(), record.id, record.version],
    );
    match updated {
        Ok(0) => {
            remove_unreferenced_blob(&ws, conn, &storage_id);
            err(
                &req.id,
                "conflict",
                "progress record changed since it was read",
                None,
            )
        }
        Ok(_) => {
            if let Some(ref old) = record.photo_storage_id {
                if *old != storage_id {
                    remove_unreferenced_blob(&ws, conn, old);
                }
            }
            ok(&req.id, json!({ "progressId": record.id }))
        }
        Err(e) => {
            remove_unreferenced_blob(&ws, conn, &storage_id);
            err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "lesson_progress" })),
            )
        }
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(w) => w.to_path_buf(),
        Err(e) => return e,
    };
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

    // A missing record is a hard error; a record that has already been reset
    // is fine, the patch below just repeats the no-op.
    let record = match find_progress(conn, &teacher_id, &lesson_id, grade_code.as_deref()) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "progress record not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Blob deletion happens before the record patch, so a failure here leaves
    // the record still pointing at the object it failed to delete.
    if let Some(ref doc) = record.evidence_storage_id {
        if let Err(e) = evidence_store::delete_object(&ws, doc) {
            return err(&req.id, "evidence_store_failed", e.to_string(), None);
        }
    }
    if let Some(ref photo) = record.photo_storage_id {
        if let Err(e) = evidence_store::delete_object(&ws, photo) {
            return err(&req.id, "evidence_store_failed", e.to_string(), None);
        }
    }

    let updated = conn.execute(
        "UPDATE lesson_progress
         SET evidence_storage_id = NULL, evidence_content_type = NULL,
             photo_storage_id = NULL, status = ?, completed_at = NULL,
             updated_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
        params![STATUS_NOT_STARTED, db::now_iso(), record.id, record.version],
    );
    match updated {
        Ok(0) => err(
            &req.id,
            "conflict",
            "progress record changed since it was read",
            None,
        ),
        Ok(_) => {
            for storage_id in [&record.evidence_storage_id, &record.photo_storage_id]
                .into_iter()
                .flatten()
            {
                let _ = conn.execute(
                    "DELETE FROM evidence_blobs WHERE storage_id = ?",
                    [storage_id],
                );
            }
            ok(
                &req.id,
                json!({ "progressId": record.id, "status": STATUS_NOT_STARTED }),
            )
        }
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "lesson_progress" })),
        ),
    }
}

fn handle_available_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let meta = match load_assignment_meta(conn, &assignment_id) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let used = match evidence_grade_codes(conn, &teacher_id, &lesson_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let grades: Vec<serde_json::Value> = meta
        .grades
        .iter()
        .filter(|(code, _)| !used.contains(code))
        .map(|(code, name)| json!({ "code": code, "name": name }))
        .collect();
    ok(&req.id, json!({ "grades": grades }))
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ws = match workspace(state, req) {
        Ok(w) => w.to_path_buf(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let out = PathBuf::from(&out_path);
    match archive::export_evidence_bundle(&ws, conn, &teacher_id, &out) {
        Ok(export) => ok(
            &req.id,
            json!({
                "ok": true,
                "path": out_path,
                "bundleFormat": export.bundle_format,
                "recordCount": export.record_count,
                "objectCount": export.object_count,
            }),
        ),
        Err(e) => err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evidence.uploadTarget" => Some(handle_upload_target(state, req)),
        "evidence.submit" => Some(handle_submit(state, req)),
        "evidence.attachPhoto" => Some(handle_attach_photo(state, req)),
        "evidence.delete" => Some(handle_delete(state, req)),
        "evidence.availableGrades" => Some(handle_available_grades(state, req)),
        "evidence.exportBundle" => Some(handle_export_bundle(state, req)),
        _ => None,
    }
}
