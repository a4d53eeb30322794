use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn campus_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "shortCode": r.get::<_, Option<String>>(2)?,
        "address": r.get::<_, Option<String>>(3)?,
        "createdAt": r.get::<_, String>(4)?,
        "updatedAt": r.get::<_, String>(5)?,
    }))
}

fn campuses_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, short_code, address, created_at, updated_at
             FROM campuses
             ORDER BY name, id",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map([], |r| campus_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "campuses": rows }))
}

fn campuses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let short_code = get_opt_str(params, "shortCode");
    let address = get_opt_str(params, "address");
    let campus_id = Uuid::new_v4().to_string();
    let now = db::now_iso();

    conn.execute(
        "INSERT INTO campuses(id, name, short_code, address, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &campus_id,
            &name,
            short_code.as_deref(),
            address.as_deref(),
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "campuses" })),
    })?;
    Ok(json!({ "campusId": campus_id }))
}

fn campuses_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let campus_id = get_required_str(params, "campusId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing patch".to_string(),
            details: None,
        })?;

    let existing: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT name, short_code, address FROM campuses WHERE id = ?",
            [&campus_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let Some((mut name, mut short_code, mut address)) = existing else {
        return Err(HandlerErr {
            code: "not_found",
            message: "campus not found".to_string(),
            details: None,
        });
    };

    for (key, value) in patch {
        match key.as_str() {
            "name" => {
                let s = value.as_str().map(str::trim).unwrap_or("");
                if s.is_empty() {
                    return Err(HandlerErr {
                        code: "bad_params",
                        message: "name must be a non-empty string".to_string(),
                        details: None,
                    });
                }
                name = s.to_string();
            }
            "shortCode" => short_code = patch_opt_text(value, "shortCode")?,
            "address" => address = patch_opt_text(value, "address")?,
            other => {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("unknown patch field: {}", other),
                    details: None,
                })
            }
        }
    }

    conn.execute(
        "UPDATE campuses SET name = ?, short_code = ?, address = ?, updated_at = ? WHERE id = ?",
        (
            &name,
            short_code.as_deref(),
            address.as_deref(),
            db::now_iso(),
            &campus_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "campuses" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn patch_opt_text(value: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    if value.is_null() {
        return Ok(None);
    }
    let s = value.as_str().ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("{} must be string or null", key),
        details: None,
    })?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn campuses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let campus_id = get_required_str(params, "campusId")?;
    let exists = conn
        .query_row("SELECT 1 FROM campuses WHERE id = ?", [&campus_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "campus not found".to_string(),
            details: None,
        });
    }

    let referenced: i64 = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM teachers WHERE campus_id = ?1)
                  + (SELECT COUNT(*) FROM curricula WHERE campus_id = ?1)",
            [&campus_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if referenced > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "campus still has teachers or curricula".to_string(),
            details: Some(json!({ "references": referenced })),
        });
    }

    conn.execute("DELETE FROM campuses WHERE id = ?", [&campus_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "campuses" })),
        })?;
    Ok(json!({ "ok": true }))
}

fn handle_campuses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match campuses_list(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_campuses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match campuses_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_campuses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match campuses_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_campuses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match campuses_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "campuses.list" => Some(handle_campuses_list(state, req)),
        "campuses.create" => Some(handle_campuses_create(state, req)),
        "campuses.update" => Some(handle_campuses_update(state, req)),
        "campuses.delete" => Some(handle_campuses_delete(state, req)),
        _ => None,
    }
}
