
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

struct Seed {
    teacher_id: String,
    lesson_id: String,
    assignment_id: String,
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(stdin, reader, "s2", "campuses.create", json!({ "name": "West" }));
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();
    let teacher = request_ok(
        stdin,
        reader,
        "s3",
        "teachers.create",
        json!({ "firstName": "Ben", "lastName": "Arai", "campusId": campus_id }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();
    let curriculum = request_ok(
        stdin,
        reader,
        "s4",
        "curricula.create",
        json!({ "campusId": campus_id, "name": "Grade 3 Math" }),
    );
    let curriculum_id = curriculum
        .get("curriculumId")
        .and_then(|v| v.as_str())
        .expect("curriculumId")
        .to_string();
    let lesson = request_ok(
        stdin,
        reader,
        "s5",
        "lessons.create",
        json!({ "curriculumId": curriculum_id, "input": { "title": "Fractions" } }),
    );
    let lesson_id = lesson
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId")
        .to_string();
    let assignment = request_ok(
        stdin,
        reader,
        "s6",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "curriculumId": curriculum_id,
            "campusId": campus_id,
            "grades": [{ "code": "03-1" }]
        }),
    );
    let assignment_id = assignment
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();
    Seed {
        teacher_id,
        lesson_id,
        assignment_id,
    }
}

#[test]
fn delete_without_record_is_a_hard_error() {
    let workspace = temp_dir("schooldesk-delete-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "evidence.delete",
        json!({ "teacherId": seed.teacher_id, "lessonId": seed.lesson_id }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn second_delete_is_tolerated_as_a_noop_repeat() {
    let workspace = temp_dir("schooldesk-delete-twice");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let target = request_ok(&mut stdin, &mut reader, "1", "evidence.uploadTarget", json!({}));
    let storage_id = target
        .get("storageId")
        .and_then(|v| v.as_str())
        .expect("storageId")
        .to_string();
    let upload_path = target
        .get("uploadPath")
        .and_then(|v| v.as_str())
        .expect("uploadPath")
        .to_string();
    std::fs::write(&upload_path, b"unit recap notes").expect("write staged upload");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "storageId": storage_id,
            "contentType": "text/plain"
        }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "evidence.delete",
        json!({ "teacherId": seed.teacher_id, "lessonId": seed.lesson_id }),
    );
    assert_eq!(first.get("status").and_then(|v| v.as_str()), Some("not_started"));

    // The record survives with its blob reference cleared, so a second delete
    // finds it, skips the blob step, and repeats the reset patch.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "evidence.delete",
        json!({ "teacherId": seed.teacher_id, "lessonId": seed.lesson_id }),
    );
    assert_eq!(second.get("status").and_then(|v| v.as_str()), Some("not_started"));
    assert_eq!(
        first.get("progressId").and_then(|v| v.as_str()),
        second.get("progressId").and_then(|v| v.as_str())
    );

    let record = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "progress.get",
        json!({ "teacherId": seed.teacher_id, "lessonId": seed.lesson_id }),
    );
    let record = record.get("record").expect("record");
    assert_eq!(
        record.get("status").and_then(|v| v.as_str()),
        Some("not_started")
    );
    assert!(record
        .get("evidenceStorageId")
        .map(|v| v.is_null())
        .unwrap_or(false));
}
