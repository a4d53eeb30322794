
use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schooldesk-router-smoke");
    let bundle_out = workspace.join("smoke-evidence.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "campuses.create",
        json!({ "name": "Smoke Campus" }),
    );
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "4", "campuses.list", json!({}));

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({ "firstName": "Smoke", "lastName": "Teacher", "campusId": campus_id }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.list",
        json!({ "campusId": campus_id }),
    );

    let curriculum = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "curricula.create",
        json!({ "campusId": campus_id, "name": "Smoke Curriculum" }),
    );
    let curriculum_id = curriculum
        .get("curriculumId")
        .and_then(|v| v.as_str())
        .expect("curriculumId")
        .to_string();
    let _ = request_ok(&mut stdin, &mut reader, "8", "curricula.list", json!({}));

    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "lessons.create",
        json!({ "curriculumId": curriculum_id, "input": { "title": "Smoke Lesson" } }),
    );
    let lesson_id = lesson
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "lessons.list",
        json!({ "curriculumId": curriculum_id }),
    );

    let assignment = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "curriculumId": curriculum_id,
            "campusId": campus_id,
            "grades": [{ "code": "S-1" }]
        }),
    );
    let assignment_id = assignment
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "assignments.list",
        json!({ "teacherId": teacher_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "progress.schedule",
        json!({
            "teacherId": teacher_id,
            "lessonId": lesson_id,
            "assignmentId": assignment_id,
            "scheduledDate": "2026-09-10"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "progress.list",
        json!({ "teacherId": teacher_id }),
    );

    let target = request_ok(&mut stdin, &mut reader, "15", "evidence.uploadTarget", json!({}));
    let storage_id = target
        .get("storageId")
        .and_then(|v| v.as_str())
        .expect("storageId")
        .to_string();
    std::fs::write(
        target.get("uploadPath").and_then(|v| v.as_str()).expect("uploadPath"),
        b"smoke evidence",
    )
    .expect("write staged upload");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "evidence.submit",
        json!({
            "teacherId": teacher_id,
            "lessonId": lesson_id,
            "assignmentId": assignment_id,
            "storageId": storage_id,
            "contentType": "text/plain"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "evidence.availableGrades",
        json!({
            "teacherId": teacher_id,
            "lessonId": lesson_id,
            "assignmentId": assignment_id
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "calendar.events",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "19", "dashboard.summary", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "dashboard.teacherProgress",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "21", "setup.open", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "evidence.exportBundle",
        json!({
            "teacherId": teacher_id,
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "evidence.delete",
        json!({ "teacherId": teacher_id, "lessonId": lesson_id }),
    );

    let unknown = request(&mut stdin, &mut reader, "24", "grades.recalculate", json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    // Everything except health needs a workspace.
    let (mut other_child, mut other_stdin, mut other_reader) = spawn_sidecar();
    let denied = request(
        &mut other_stdin,
        &mut other_reader,
        "25",
        "campuses.list",
        json!({}),
    );
    assert_eq!(
        denied
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_workspace")
    );
    drop(other_stdin);
    let _ = other_child.wait();

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
