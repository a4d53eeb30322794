use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const STATUS_COMPLETED: &str = "completed";

// Binary classification only: completed gets one token, everything else --
// including status values this build does not know about -- gets the other.
const COLOR_COMPLETED: &str = "#22c55e";
const COLOR_PENDING: &str = "#f59e0b";

const UNKNOWN_LESSON: &str = "Unknown Lesson";
const UNKNOWN_COURSE: &str = "Unknown Course";

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

fn parse_json_array_string(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn event_color(status: &str) -> &'static str {
    if status == STATUS_COMPLETED {
        COLOR_COMPLETED
    } else {
        COLOR_PENDING
    }
}

fn handle_calendar_events(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Pure projection: unscheduled rows are filtered out, join gaps fall back
    // to placeholder names, nothing is written.
    let mut stmt = match conn.prepare(
        "SELECT p.id, p.lesson_id, p.scheduled_date, p.status, p.grade_code,
                p.evidence_storage_id, p.photo_storage_id, p.is_verified, p.quarter,
                l.title, l.description, l.standards_json, c.name
         FROM lesson_progress p
         LEFT JOIN lessons l ON l.id = p.lesson_id
         LEFT JOIN curricula c ON c.id = p.curriculum_id
         WHERE p.teacher_id = ? AND p.scheduled_date IS NOT NULL
         ORDER BY p.created_at, p.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let events = stmt
        .query_map([&teacher_id], |r| {
            let status: String = r.get(3)?;
            let grade_code: Option<String> = r.get(4)?;
            let evidence_storage_id: Option<String> = r.get(5)?;
            let photo_storage_id: Option<String> = r.get(6)?;
            let title: Option<String> = r.get(9)?;
            let description: Option<String> = r.get(10)?;
            let standards_raw: Option<String> = r.get(11)?;
            let course_name: Option<String> = r.get(12)?;
            let grades: Vec<String> = grade_code.into_iter().collect();
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lessonId": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "title": title.unwrap_or_else(|| UNKNOWN_LESSON.to_string()),
                "courseName": course_name.unwrap_or_else(|| UNKNOWN_COURSE.to_string()),
                "description": description.unwrap_or_default(),
                "standards": standards_raw
                    .map(|raw| parse_json_array_string(&raw))
                    .unwrap_or_default(),
                "grades": grades,
                "quarter": r.get::<_, i64>(8)?,
                "status": status.clone(),
                "color": event_color(&status),
                "hasEvidence": evidence_storage_id.is_some() || photo_storage_id.is_some(),
                "isVerified": r.get::<_, i64>(7)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match events {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.events" => Some(handle_calendar_events(state, req)),
        _ => None,
    }
}
