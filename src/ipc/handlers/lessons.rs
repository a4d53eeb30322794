use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
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

fn parse_quarter(v: Option<&JsonValue>, default: i64) -> Result<i64, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => {
            let q = v.as_i64().ok_or("quarter must be integer")?;
            if !(1..=4).contains(&q) {
                return Err("quarter must be in 1..=4");
            }
            Ok(q)
        }
    }
}

fn parse_standards(v: Option<&JsonValue>) -> Result<Vec<String>, &'static str> {
    match v {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => {
            let arr = v.as_array().ok_or("standards must be array of strings")?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or("standards must be array of strings")?
                    .trim()
                    .to_string();
                if !s.is_empty() {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

fn json_array_string(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_array_string(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn ensure_curriculum_exists(conn: &Connection, curriculum_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM curricula WHERE id = ? LIMIT 1",
        [curriculum_id],
        |_r| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
}

fn next_sort_order(conn: &Connection, curriculum_id: &str) -> Result<i64, rusqlite::Error> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM lessons WHERE curriculum_id = ?",
        [curriculum_id],
        |r| r.get(0),
    )?;
    Ok(next.max(0))
}

fn lesson_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let standards_raw: String = r.get(4)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "curriculumId": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "description": r.get::<_, String>(3)?,
        "standards": parse_json_array_string(&standards_raw),
        "quarter": r.get::<_, i64>(5)?,
        "sortOrder": r.get::<_, i64>(6)?,
        "createdAt": r.get::<_, String>(7)?,
        "updatedAt": r.get::<_, String>(8)?,
    }))
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let quarter = match parse_quarter(req.params.get("quarter"), 0) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    match ensure_curriculum_exists(conn, &curriculum_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "curriculum not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let sql = if quarter > 0 {
        "SELECT id, curriculum_id, title, description, standards_json, quarter, sort_order,
                created_at, updated_at
         FROM lessons
         WHERE curriculum_id = ? AND quarter = ?
         ORDER BY sort_order, id"
    } else {
        "SELECT id, curriculum_id, title, description, standards_json, quarter, sort_order,
                created_at, updated_at
         FROM lessons
         WHERE curriculum_id = ?
         ORDER BY sort_order, id"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mapped = if quarter > 0 {
        stmt.query_map(params![curriculum_id, quarter], |r| lesson_row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([&curriculum_id], |r| lesson_row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };
    match mapped {
        Ok(lessons) => ok(&req.id, json!({ "lessons": lessons })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing input", None);
    };
    let title = match input.get("title").and_then(|v| v.as_str()).map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return err(&req.id, "bad_params", "missing input.title", None),
    };
    let description = input
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    let standards = match parse_standards(input.get("standards")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let quarter = match parse_quarter(input.get("quarter"), 1) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match ensure_curriculum_exists(conn, &curriculum_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "curriculum not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let sort_order = match next_sort_order(conn, &curriculum_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let lesson_id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(id, curriculum_id, title, description, standards_json, quarter,
                             sort_order, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &lesson_id,
            &curriculum_id,
            &title,
            &description,
            json_array_string(&standards),
            quarter,
            sort_order,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }
    ok(&req.id, json!({ "lessonId": lesson_id }))
}

fn handle_lessons_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let existing = conn
        .query_row(
            "SELECT title, description, standards_json, quarter FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            },
        )
        .optional();
    let (mut title, mut description, mut standards_json, mut quarter) = match existing {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    for (key, value) in patch {
        match key.as_str() {
            "title" => {
                let s = value.as_str().map(str::trim).unwrap_or("");
                if s.is_empty() {
                    return err(&req.id, "bad_params", "title must be a non-empty string", None);
                }
                title = s.to_string();
            }
            "description" => {
                let Some(s) = value.as_str() else {
                    return err(&req.id, "bad_params", "description must be string", None);
                };
                description = s.trim().to_string();
            }
            "standards" => match parse_standards(Some(value)) {
                Ok(v) => standards_json = json_array_string(&v),
                Err(m) => return err(&req.id, "bad_params", m, None),
            },
            "quarter" => match parse_quarter(Some(value), quarter) {
                Ok(v) => quarter = v,
                Err(m) => return err(&req.id, "bad_params", m, None),
            },
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
        "UPDATE lessons SET title = ?, description = ?, standards_json = ?, quarter = ?,
                updated_at = ?
         WHERE id = ?",
        (
            &title,
            &description,
            &standards_json,
            quarter,
            db::now_iso(),
            &lesson_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_lessons_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_order) = req.params.get("lessonIdOrder").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing lessonIdOrder", None);
    };
    let mut order = Vec::with_capacity(raw_order.len());
    let mut seen = HashSet::new();
    for item in raw_order {
        let Some(id) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(
                &req.id,
                "bad_params",
                "lessonIdOrder must contain only lesson ids",
                None,
            );
        };
        if seen.insert(id.to_string()) {
            order.push(id.to_string());
        }
    }
    if order.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "lessonIdOrder must contain at least one lesson id",
            None,
        );
    }

    let existing: Result<Vec<String>, _> = conn
        .prepare("SELECT id FROM lessons WHERE curriculum_id = ?")
        .and_then(|mut stmt| {
            stmt.query_map([&curriculum_id], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect())
        });
    let existing = match existing {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let known: HashSet<&String> = existing.iter().collect();
    for id in &order {
        if !known.contains(id) {
            return err(
                &req.id,
                "not_found",
                format!("lesson not in curriculum: {}", id),
                None,
            );
        }
    }

    let now = db::now_iso();
    for (idx, id) in order.iter().enumerate() {
        if let Err(e) = conn.execute(
            "UPDATE lessons SET sort_order = ?, updated_at = ? WHERE id = ?",
            (idx as i64, &now, id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "lessons" })),
            );
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Progress rows keep the lesson id even after the lesson goes away; the
    // calendar renders those rows with a fallback title.
    let deleted = conn.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id]);
    match deleted {
        Ok(0) => err(&req.id, "not_found", "lesson not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.update" => Some(handle_lessons_update(state, req)),
        "lessons.reorder" => Some(handle_lessons_reorder(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        _ => None,
    }
}
