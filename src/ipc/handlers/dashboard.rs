use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

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

fn scoped_count(
    conn: &Connection,
    all_sql: &str,
    scoped_sql: &str,
    campus_id: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    match campus_id {
        Some(cid) => conn.query_row(scoped_sql, [cid], |r| r.get(0)),
        None => conn.query_row(all_sql, [], |r| r.get(0)),
    }
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let campus_id = opt_str(req, "campusId");
    let cid = campus_id.as_deref();

    let counts = (|| -> Result<serde_json::Value, rusqlite::Error> {
        let campuses: i64 = conn.query_row("SELECT COUNT(*) FROM campuses", [], |r| r.get(0))?;
        let teachers = scoped_count(
            conn,
            "SELECT COUNT(*) FROM teachers WHERE active = 1",
            "SELECT COUNT(*) FROM teachers WHERE active = 1 AND campus_id = ?",
            cid,
        )?;
        let curricula = scoped_count(
            conn,
            "SELECT COUNT(*) FROM curricula",
            "SELECT COUNT(*) FROM curricula WHERE campus_id = ?",
            cid,
        )?;
        let lessons = scoped_count(
            conn,
            "SELECT COUNT(*) FROM lessons",
            "SELECT COUNT(*) FROM lessons WHERE curriculum_id IN
                 (SELECT id FROM curricula WHERE campus_id = ?)",
            cid,
        )?;
        let assignments = scoped_count(
            conn,
            "SELECT COUNT(*) FROM assignments",
            "SELECT COUNT(*) FROM assignments WHERE campus_id = ?",
            cid,
        )?;
        let (tracked, completed, verified) = match cid {
            Some(c) => conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN is_verified = 1 THEN 1 ELSE 0 END), 0)
                 FROM lesson_progress WHERE campus_id = ?",
                [c],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN is_verified = 1 THEN 1 ELSE 0 END), 0)
                 FROM lesson_progress",
                [],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
            )?,
        };
        Ok(json!({
            "counts": {
                "campuses": campuses,
                "teachers": teachers,
                "curricula": curricula,
                "lessons": lessons,
                "assignments": assignments,
            },
            "progress": {
                "tracked": tracked,
                "completed": completed,
                "verified": verified,
            },
        }))
    })();

    match counts {
        Ok(summary) => ok(&req.id, summary),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_dashboard_teacher_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // One row per assigned curriculum; progress rows are matched by the ids
    // they carry, so rows surviving a curriculum deletion simply drop out here.
    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name,
                (SELECT COUNT(*) FROM lessons l WHERE l.curriculum_id = c.id),
                COALESCE(SUM(CASE WHEN p.status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN p.is_verified = 1 THEN 1 ELSE 0 END), 0)
         FROM (SELECT DISTINCT teacher_id, curriculum_id FROM assignments WHERE teacher_id = ?) a
         JOIN curricula c ON c.id = a.curriculum_id
         LEFT JOIN lesson_progress p
           ON p.teacher_id = a.teacher_id AND p.curriculum_id = c.id
         GROUP BY c.id, c.name
         ORDER BY c.name, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "curriculumId": r.get::<_, String>(0)?,
                "curriculumName": r.get::<_, String>(1)?,
                "lessonCount": r.get::<_, i64>(2)?,
                "completedCount": r.get::<_, i64>(3)?,
                "verifiedCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(curricula) => ok(&req.id, json!({ "curricula": curricula })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_dashboard_summary(state, req)),
        "dashboard.teacherProgress" => Some(handle_dashboard_teacher_progress(state, req)),
        _ => None,
    }
}
