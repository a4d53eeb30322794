use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, ToSql};
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

fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

struct GradeSection {
    code: String,
    name: String,
}

fn parse_grades(v: Option<&JsonValue>) -> Result<Vec<GradeSection>, String> {
    let Some(raw) = v else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let arr = raw
        .as_array()
        .ok_or_else(|| "grades must be an array".to_string())?;
    let mut out = Vec::with_capacity(arr.len());
    let mut seen = HashSet::new();
    for item in arr {
        let obj = item
            .as_object()
            .ok_or_else(|| "grades entries must be objects".to_string())?;
        let code = obj
            .get("code")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "grades entries must carry a code".to_string())?
            .to_string();
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| code.clone());
        if seen.insert(code.clone()) {
            out.push(GradeSection { code, name });
        }
    }
    Ok(out)
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(sql, [id], |_r| Ok(())).optional().map(|v| v.is_some())
}

fn load_grades(conn: &Connection, assignment_id: &str) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT code, name FROM assignment_grades WHERE assignment_id = ? ORDER BY sort_order, code",
    )?;
    stmt.query_map([assignment_id], |r| {
        Ok(json!({
            "code": r.get::<_, String>(0)?,
            "name": r.get::<_, String>(1)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn replace_grades(
    conn: &Connection,
    assignment_id: &str,
    grades: &[GradeSection],
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM assignment_grades WHERE assignment_id = ?",
        [assignment_id],
    )?;
    for (idx, grade) in grades.iter().enumerate() {
        conn.execute(
            "INSERT INTO assignment_grades(assignment_id, code, name, sort_order)
             VALUES(?, ?, ?, ?)",
            (assignment_id, &grade.code, &grade.name, idx as i64),
        )?;
    }
    Ok(())
}

fn assignment_row_json(
    conn: &Connection,
    r: &rusqlite::Row<'_>,
) -> rusqlite::Result<serde_json::Value> {
    let assignment_id: String = r.get(0)?;
    let grades = load_grades(conn, &assignment_id)?;
    Ok(json!({
        "id": assignment_id,
        "teacherId": r.get::<_, String>(1)?,
        "curriculumId": r.get::<_, String>(2)?,
        "campusId": r.get::<_, String>(3)?,
        "schoolYear": r.get::<_, Option<String>>(4)?,
        "grades": grades,
        "createdAt": r.get::<_, String>(5)?,
        "updatedAt": r.get::<_, String>(6)?,
    }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = opt_str(req, "teacherId");
    let campus_id = opt_str(req, "campusId");

    let mut sql = String::from(
        "SELECT id, teacher_id, curriculum_id, campus_id, school_year, created_at, updated_at
         FROM assignments",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref tid) = teacher_id {
        clauses.push("teacher_id = ?");
        binds.push(tid);
    }
    if let Some(ref cid) = campus_id {
        clauses.push("campus_id = ?");
        binds.push(cid);
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at, id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignments = match stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            assignment_row_json(conn, r)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "assignments": assignments }))
}

fn handle_assignments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = conn
        .query_row(
            "SELECT id, teacher_id, curriculum_id, campus_id, school_year, created_at, updated_at
             FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| assignment_row_json(conn, r),
        )
        .optional();
    match row {
        Ok(Some(assignment)) => ok(&req.id, json!({ "assignment": assignment })),
        Ok(None) => err(&req.id, "not_found", "assignment not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let campus_id = match required_str(req, "campusId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_year = opt_str(req, "schoolYear");
    let grades = match parse_grades(req.params.get("grades")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    for (sql, id, label) in [
        ("SELECT 1 FROM teachers WHERE id = ?", &teacher_id, "teacher"),
        (
            "SELECT 1 FROM curricula WHERE id = ?",
            &curriculum_id,
            "curriculum",
        ),
        ("SELECT 1 FROM campuses WHERE id = ?", &campus_id, "campus"),
    ] {
        match row_exists(conn, sql, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("{} not found", label), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let duplicate = conn
        .query_row(
            "SELECT id FROM assignments WHERE teacher_id = ? AND curriculum_id = ? AND campus_id = ?",
            (&teacher_id, &curriculum_id, &campus_id),
            |r| r.get::<_, String>(0),
        )
        .optional();
    match duplicate {
        Ok(Some(existing)) => {
            return err(
                &req.id,
                "conflict",
                "assignment already exists for this teacher, curriculum and campus",
                Some(json!({ "assignmentId": existing })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let assignment_id = Uuid::new_v4().to_string();
    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(id, teacher_id, curriculum_id, campus_id, school_year,
                                 created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &teacher_id,
            &curriculum_id,
            &campus_id,
            school_year.as_deref(),
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }
    if let Err(e) = replace_grades(conn, &assignment_id, &grades) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignment_grades" })),
        );
    }
    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_assignments_set_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grades = match parse_grades(req.params.get("grades")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match row_exists(conn, "SELECT 1 FROM assignments WHERE id = ?", &assignment_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = replace_grades(conn, &assignment_id, &grades) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "assignment_grades" })),
        );
    }
    if let Err(e) = conn.execute(
        "UPDATE assignments SET updated_at = ? WHERE id = ?",
        (db::now_iso(), &assignment_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "SELECT 1 FROM assignments WHERE id = ?", &assignment_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "DELETE FROM assignment_grades WHERE assignment_id = ?",
        [&assignment_id],
    ) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignment_grades" })),
        );
    }
    if let Err(e) = conn.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.get" => Some(handle_assignments_get(state, req)),
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.setGrades" => Some(handle_assignments_set_grades(state, req)),
        "assignments.delete" => Some(handle_assignments_delete(state, req)),
        _ => None,
    }
}
