use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn curriculum_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "campusId": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "subject": r.get::<_, Option<String>>(3)?,
        "gradeLevel": r.get::<_, Option<String>>(4)?,
        "createdAt": r.get::<_, String>(5)?,
        "updatedAt": r.get::<_, String>(6)?,
    }))
}

fn handle_curricula_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let campus_id = opt_str(req, "campusId");

    let sql = if campus_id.is_some() {
        "SELECT id, campus_id, name, subject, grade_level, created_at, updated_at
         FROM curricula WHERE campus_id = ? ORDER BY name, id"
    } else {
        "SELECT id, campus_id, name, subject, grade_level, created_at, updated_at
         FROM curricula ORDER BY name, id"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mapped = if let Some(ref cid) = campus_id {
        stmt.query_map([cid], |r| curriculum_row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], |r| curriculum_row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };
    match mapped {
        Ok(rows) => ok(&req.id, json!({ "curricula": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_curricula_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let campus_id = match required_str(req, "campusId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = opt_str(req, "subject");
    let grade_level = opt_str(req, "gradeLevel");

    let campus_found = conn
        .query_row("SELECT 1 FROM campuses WHERE id = ?", [&campus_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional();
    match campus_found {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "campus not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let curriculum_id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO curricula(id, campus_id, name, subject, grade_level, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &curriculum_id,
            &campus_id,
            &name,
            subject.as_deref(),
            grade_level.as_deref(),
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "curricula" })),
        );
    }
    ok(&req.id, json!({ "curriculumId": curriculum_id }))
}

fn handle_curricula_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let existing = conn
        .query_row(
            "SELECT name, subject, grade_level FROM curricula WHERE id = ?",
            [&curriculum_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional();
    let (mut name, mut subject, mut grade_level) = match existing {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "curriculum not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    for (key, value) in patch {
        match key.as_str() {
            "name" => {
                let s = value.as_str().map(str::trim).unwrap_or("");
                if s.is_empty() {
                    return err(&req.id, "bad_params", "name must be a non-empty string", None);
                }
                name = s.to_string();
            }
            "subject" | "gradeLevel" => {
                let next = if value.is_null() {
                    None
                } else {
                    match value.as_str().map(str::trim) {
                        Some(s) if !s.is_empty() => Some(s.to_string()),
                        Some(_) => None,
                        None => {
                            return err(
                                &req.id,
                                "bad_params",
                                format!("{} must be string or null", key),
                                None,
                            )
                        }
                    }
                };
                if key == "subject" {
                    subject = next;
                } else {
                    grade_level = next;
                }
            }
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown patch field: {}", other),
                    None,
                )
            }
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE curricula SET name = ?, subject = ?, grade_level = ?, updated_at = ? WHERE id = ?",
        (
            &name,
            subject.as_deref(),
            grade_level.as_deref(),
            db::now_iso(),
            &curriculum_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "curricula" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_curricula_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists = conn
        .query_row("SELECT 1 FROM curricula WHERE id = ?", [&curriculum_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional();
    match exists {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "curriculum not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let referenced: i64 = match conn.query_row(
        "SELECT (SELECT COUNT(*) FROM lessons WHERE curriculum_id = ?1)
              + (SELECT COUNT(*) FROM assignments WHERE curriculum_id = ?1)",
        [&curriculum_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if referenced > 0 {
        return err(
            &req.id,
            "conflict",
            "curriculum still has lessons or assignments",
            Some(json!({ "references": referenced })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM curricula WHERE id = ?", [&curriculum_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "curricula" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "curricula.list" => Some(handle_curricula_list(state, req)),
        "curricula.create" => Some(handle_curricula_create(state, req)),
        "curricula.update" => Some(handle_curricula_update(state, req)),
        "curricula.delete" => Some(handle_curricula_delete(state, req)),
        _ => None,
    }
}
