
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn assignment_lifecycle_and_grade_sections() {
    let workspace = temp_dir("schooldesk-assignments");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(&mut stdin, &mut reader, "2", "campuses.create", json!({ "name": "Main" }));
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "firstName": "Omar", "lastName": "Sy", "campusId": campus_id }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();
    let curriculum = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "curricula.create",
        json!({ "campusId": campus_id, "name": "Grade 1 Phonics", "subject": "Literacy" }),
    );
    let curriculum_id = curriculum
        .get("curriculumId")
        .and_then(|v| v.as_str())
        .expect("curriculumId")
        .to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "curriculumId": curriculum_id,
            "campusId": campus_id,
            "schoolYear": "2026-2027",
            "grades": [
                { "code": "01-2", "name": "Section 2" },
                { "code": "01-1", "name": "Section 1" },
                { "code": "01-1", "name": "Duplicate gets dropped" }
            ]
        }),
    );
    let assignment_id = created
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.get",
        json!({ "assignmentId": assignment_id }),
    );
    let assignment = fetched.get("assignment").expect("assignment");
    let grades = assignment.get("grades").and_then(|v| v.as_array()).expect("grades");
    // Given order wins; the duplicate code collapsed into the first entry.
    assert_eq!(grades.len(), 2);
    assert_eq!(grades[0].get("code").and_then(|v| v.as_str()), Some("01-2"));
    assert_eq!(grades[1].get("code").and_then(|v| v.as_str()), Some("01-1"));
    assert_eq!(grades[1].get("name").and_then(|v| v.as_str()), Some("Section 1"));

    // One assignment per teacher+curriculum+campus tuple.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "curriculumId": curriculum_id,
            "campusId": campus_id
        }),
    );
    assert_eq!(code, "conflict");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assignments.setGrades",
        json!({
            "assignmentId": assignment_id,
            "grades": [{ "code": "01-3", "name": "Section 3" }]
        }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.get",
        json!({ "assignmentId": assignment_id }),
    );
    let grades = fetched
        .get("assignment")
        .and_then(|a| a.get("grades"))
        .and_then(|v| v.as_array())
        .expect("grades");
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0].get("code").and_then(|v| v.as_str()), Some("01-3"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "assignments.list",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(
        listed
            .get("assignments")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "assignments.delete",
        json!({ "assignmentId": assignment_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "assignments.get",
        json!({ "assignmentId": assignment_id }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "assignments.create",
        json!({
            "teacherId": teacher_id,
            "curriculumId": "9f7a2f60-0000-4000-8000-000000000000",
            "campusId": campus_id
        }),
    );
    assert_eq!(code, "not_found");
}
