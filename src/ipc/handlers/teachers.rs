use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const ROLE_ADMIN: &str = "admin";
const ROLE_TEACHER: &str = "teacher";

/// Display identity shown on dashboard cards. A closed union: every renderer
/// matches all three shapes, there is no ad-hoc optional-field record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Avatar {
    #[serde(rename_all = "camelCase")]
    Icon { name: String },
    #[serde(rename_all = "camelCase")]
    Image { storage_id: String },
    #[serde(rename_all = "camelCase")]
    Initials { text: String },
}

fn avatar_to_columns(avatar: &Avatar) -> (&'static str, String) {
    match avatar {
        Avatar::Icon { name } => ("icon", name.clone()),
        Avatar::Image { storage_id } => ("image", storage_id.clone()),
        Avatar::Initials { text } => ("initials", text.clone()),
    }
}

fn avatar_from_columns(kind: &str, value: &str) -> Avatar {
    match kind {
        "icon" => Avatar::Icon {
            name: value.to_string(),
        },
        "image" => Avatar::Image {
            storage_id: value.to_string(),
        },
        _ => Avatar::Initials {
            text: value.to_string(),
        },
    }
}

fn default_avatar(first_name: &str, last_name: &str) -> Avatar {
    let mut text = String::new();
    if let Some(c) = first_name.chars().next() {
        text.extend(c.to_uppercase());
    }
    if let Some(c) = last_name.chars().next() {
        text.extend(c.to_uppercase());
    }
    Avatar::Initials { text }
}

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

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn db_failed(code: &'static str, e: impl ToString) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_role(role: &str) -> bool {
    matches!(role, ROLE_ADMIN | ROLE_TEACHER)
}

fn parse_avatar(value: &serde_json::Value) -> Result<Avatar, HandlerErr> {
    serde_json::from_value::<Avatar>(value.clone())
        .map_err(|e| bad_params(format!("invalid avatar: {}", e)))
}

fn campus_exists(conn: &Connection, campus_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM campuses WHERE id = ?", [campus_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_failed("db_query_failed", e))
}

fn teacher_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    let avatar_kind: String = r.get(6)?;
    let avatar_value: String = r.get(7)?;
    let avatar = avatar_from_columns(&avatar_kind, &avatar_value);
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "campusId": r.get::<_, Option<String>>(1)?,
        "firstName": first,
        "lastName": last.clone(),
        "displayName": format!("{}, {}", last, first),
        "email": r.get::<_, Option<String>>(4)?,
        "role": r.get::<_, String>(5)?,
        "avatar": serde_json::to_value(&avatar).unwrap_or(serde_json::Value::Null),
        "active": r.get::<_, i64>(8)? != 0,
        "createdAt": r.get::<_, String>(9)?,
        "updatedAt": r.get::<_, String>(10)?,
    }))
}

fn teachers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let campus_id = get_opt_str(params, "campusId");
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut sql = String::from(
        "SELECT id, campus_id, first_name, last_name, email, role,
                avatar_kind, avatar_value, active, created_at, updated_at
         FROM teachers",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref cid) = campus_id {
        clauses.push("campus_id = ?");
        binds.push(cid);
    }
    if !include_inactive {
        clauses.push("active = 1");
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY last_name, first_name, id");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| db_failed("db_query_failed", e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| teacher_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed("db_query_failed", e))?;
    Ok(json!({ "teachers": rows }))
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let campus_id = get_opt_str(params, "campusId");
    let email = get_opt_str(params, "email");
    let role = get_opt_str(params, "role").unwrap_or_else(|| ROLE_TEACHER.to_string());
    if !validate_role(&role) {
        return Err(bad_params("role must be one of: admin, teacher"));
    }
    if let Some(ref cid) = campus_id {
        if !campus_exists(conn, cid)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "campus not found".to_string(),
                details: None,
            });
        }
    }
    let avatar = match params.get("avatar") {
        None => default_avatar(&first_name, &last_name),
        Some(v) if v.is_null() => default_avatar(&first_name, &last_name),
        Some(v) => parse_avatar(v)?,
    };
    let (avatar_kind, avatar_value) = avatar_to_columns(&avatar);

    let teacher_id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    conn.execute(
        "INSERT INTO teachers(id, campus_id, first_name, last_name, email, role,
                              avatar_kind, avatar_value, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &teacher_id,
            campus_id.as_deref(),
            &first_name,
            &last_name,
            email.as_deref(),
            &role,
            avatar_kind,
            &avatar_value,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;
    Ok(json!({ "teacherId": teacher_id }))
}

struct TeacherRow {
    campus_id: Option<String>,
    first_name: String,
    last_name: String,
    email: Option<String>,
    role: String,
    avatar: Avatar,
    active: bool,
}

fn teachers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| bad_params("missing patch"))?;

    let existing = conn
        .query_row(
            "SELECT campus_id, first_name, last_name, email, role, avatar_kind, avatar_value, active
             FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| {
                let avatar_kind: String = r.get(5)?;
                let avatar_value: String = r.get(6)?;
                Ok(TeacherRow {
                    campus_id: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                    email: r.get(3)?,
                    role: r.get(4)?,
                    avatar: avatar_from_columns(&avatar_kind, &avatar_value),
                    active: r.get::<_, i64>(7)? != 0,
                })
            },
        )
        .optional()
        .map_err(|e| db_failed("db_query_failed", e))?;
    let Some(mut row) = existing else {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    };

    for (key, value) in patch {
        match key.as_str() {
            "firstName" => {
                let s = value.as_str().map(str::trim).unwrap_or("");
                if s.is_empty() {
                    return Err(bad_params("firstName must be a non-empty string"));
                }
                row.first_name = s.to_string();
            }
            "lastName" => {
                let s = value.as_str().map(str::trim).unwrap_or("");
                if s.is_empty() {
                    return Err(bad_params("lastName must be a non-empty string"));
                }
                row.last_name = s.to_string();
            }
            "email" => {
                row.email = if value.is_null() {
                    None
                } else {
                    let s = value
                        .as_str()
                        .ok_or_else(|| bad_params("email must be string or null"))?
                        .trim()
                        .to_string();
                    if s.is_empty() {
                        None
                    } else {
                        Some(s)
                    }
                };
            }
            "role" => {
                let s = value
                    .as_str()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .unwrap_or_default();
                if !validate_role(&s) {
                    return Err(bad_params("role must be one of: admin, teacher"));
                }
                row.role = s;
            }
            "campusId" => {
                row.campus_id = if value.is_null() {
                    None
                } else {
                    let cid = value
                        .as_str()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| bad_params("campusId must be string or null"))?
                        .to_string();
                    if !campus_exists(conn, &cid)? {
                        return Err(HandlerErr {
                            code: "not_found",
                            message: "campus not found".to_string(),
                            details: None,
                        });
                    }
                    Some(cid)
                };
            }
            "active" => {
                row.active = value
                    .as_bool()
                    .ok_or_else(|| bad_params("active must be boolean"))?;
            }
            "avatar" => {
                row.avatar = parse_avatar(value)?;
            }
            other => return Err(bad_params(format!("unknown patch field: {}", other))),
        }
    }

    let (avatar_kind, avatar_value) = avatar_to_columns(&row.avatar);
    conn.execute(
        "UPDATE teachers
         SET campus_id = ?, first_name = ?, last_name = ?, email = ?, role = ?,
             avatar_kind = ?, avatar_value = ?, active = ?, updated_at = ?
         WHERE id = ?",
        (
            row.campus_id.as_deref(),
            &row.first_name,
            &row.last_name,
            row.email.as_deref(),
            &row.role,
            avatar_kind,
            &avatar_value,
            row.active as i64,
            db::now_iso(),
            &teacher_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;
    Ok(json!({ "ok": true }))
}

fn teachers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| db_failed("db_query_failed", e))?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    }

    let assignments: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM assignments WHERE teacher_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(|e| db_failed("db_query_failed", e))?;
    if assignments > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "teacher still has assignments".to_string(),
            details: Some(json!({ "assignments": assignments })),
        });
    }

    conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "teachers" })),
        })?;
    Ok(json!({ "ok": true }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle(state, req, teachers_list)),
        "teachers.create" => Some(handle(state, req, teachers_create)),
        "teachers.update" => Some(handle(state, req, teachers_update)),
        "teachers.delete" => Some(handle(state, req, teachers_delete)),
        _ => None,
    }
}
