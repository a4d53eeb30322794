
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

struct Seed {
    teacher_id: String,
    lesson_id: String,
    assignment_id: String,
}

fn seed_two_sections(
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
    let campus = request_ok(
        stdin,
        reader,
        "s2",
        "campuses.create",
        json!({ "name": "East Campus" }),
    );
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();
    let teacher = request_ok(
        stdin,
        reader,
        "s3",
        "teachers.create",
        json!({ "firstName": "Dana", "lastName": "Okafor", "campusId": campus_id }),
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
        json!({ "campusId": campus_id, "name": "Grade 1 Literacy" }),
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
        json!({ "curriculumId": curriculum_id, "input": { "title": "Letter Sounds" } }),
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
            "grades": [
                { "code": "01-1", "name": "Section 1" },
                { "code": "01-2", "name": "Section 2" }
            ]
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

fn stage_upload(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    bytes: &[u8],
) -> String {
    let target = request_ok(stdin, reader, id, "evidence.uploadTarget", json!({}));
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
    std::fs::write(upload_path, bytes).expect("write staged upload");
    storage_id
}

#[test]
fn multi_section_submission_tracks_available_grades() {
    let workspace = temp_dir("schooldesk-grade-sections");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_two_sections(&mut stdin, &mut reader, &workspace);

    // Two sections and no gradeCode: rejected before anything is written.
    let storage_id = stage_upload(&mut stdin, &mut reader, "1", b"photo of chart");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "storageId": storage_id,
            "contentType": "image/jpeg"
        }),
    );
    assert_eq!(code, "bad_params");

    // A section outside the assignment is rejected too.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "gradeCode": "02-9",
            "storageId": storage_id,
            "contentType": "image/jpeg"
        }),
    );
    assert_eq!(code, "bad_params");

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "gradeCode": "01-1",
            "storageId": storage_id,
            "contentType": "image/jpeg"
        }),
    );
    assert!(submitted.get("progressId").and_then(|v| v.as_str()).is_some());

    let available = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "evidence.availableGrades",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id
        }),
    );
    let grades = available.get("grades").and_then(|v| v.as_array()).expect("grades");
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0].get("code").and_then(|v| v.as_str()), Some("01-2"));

    // Section 01-1 already holds evidence.
    let repeat_id = stage_upload(&mut stdin, &mut reader, "6", b"second photo");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "gradeCode": "01-1",
            "storageId": repeat_id,
            "contentType": "image/jpeg"
        }),
    );
    assert_eq!(code, "bad_params");

    let second_id = stage_upload(&mut stdin, &mut reader, "8", b"section two photo");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "gradeCode": "01-2",
            "storageId": second_id,
            "contentType": "image/jpeg"
        }),
    );

    // Two independent records, one per section.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "progress.list",
        json!({ "teacherId": seed.teacher_id }),
    );
    let records = listed.get("records").and_then(|v| v.as_array()).expect("records");
    assert_eq!(records.len(), 2);
    let mut codes: Vec<&str> = records
        .iter()
        .filter_map(|r| r.get("gradeCode").and_then(|v| v.as_str()))
        .collect();
    codes.sort_unstable();
    assert_eq!(codes, vec!["01-1", "01-2"]);
    assert!(records
        .iter()
        .all(|r| r.get("status").and_then(|v| v.as_str()) == Some("completed")));

    let exhausted = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "evidence.availableGrades",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id
        }),
    );
    assert_eq!(
        exhausted
            .get("grades")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn deleting_section_evidence_frees_the_section() {
    let workspace = temp_dir("schooldesk-grade-sections-free");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_two_sections(&mut stdin, &mut reader, &workspace);

    let storage_id = stage_upload(&mut stdin, &mut reader, "1", b"work sample");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evidence.submit",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id,
            "gradeCode": "01-1",
            "storageId": storage_id,
            "contentType": "application/pdf"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "evidence.delete",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "gradeCode": "01-1"
        }),
    );

    let available = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "evidence.availableGrades",
        json!({
            "teacherId": seed.teacher_id,
            "lessonId": seed.lesson_id,
            "assignmentId": seed.assignment_id
        }),
    );
    let grades = available.get("grades").and_then(|v| v.as_array()).expect("grades");
    assert_eq!(grades.len(), 2, "a reset section becomes available again");
}
