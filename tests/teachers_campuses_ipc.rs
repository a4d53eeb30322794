
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn campus_and_teacher_management_flow() {
    let workspace = temp_dir("schooldesk-admin-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let campus = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "campuses.create",
        json!({ "name": "Riverside", "shortCode": "RIV" }),
    );
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({
            "firstName": "Ana",
            "lastName": "Silva",
            "campusId": campus_id,
            "email": "ana.silva@example.edu",
            "role": "admin",
            "avatar": { "kind": "icon", "name": "book-open" }
        }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.list",
        json!({ "campusId": campus_id }),
    );
    let teachers = listed.get("teachers").and_then(|v| v.as_array()).expect("teachers");
    assert_eq!(teachers.len(), 1);
    let row = &teachers[0];
    assert_eq!(row.get("displayName").and_then(|v| v.as_str()), Some("Silva, Ana"));
    assert_eq!(row.get("role").and_then(|v| v.as_str()), Some("admin"));
    let avatar = row.get("avatar").expect("avatar");
    assert_eq!(avatar.get("kind").and_then(|v| v.as_str()), Some("icon"));
    assert_eq!(avatar.get("name").and_then(|v| v.as_str()), Some("book-open"));

    // Avatars swap shape cleanly between union arms.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.update",
        json!({
            "teacherId": teacher_id,
            "patch": { "avatar": { "kind": "initials", "text": "AS" } }
        }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.list",
        json!({ "campusId": campus_id }),
    );
    let avatar = listed
        .get("teachers")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|t| t.get("avatar"))
        .expect("avatar");
    assert_eq!(avatar.get("kind").and_then(|v| v.as_str()), Some("initials"));
    assert_eq!(avatar.get("text").and_then(|v| v.as_str()), Some("AS"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.update",
        json!({ "teacherId": teacher_id, "patch": { "role": "principal" } }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.create",
        json!({
            "firstName": "Bad",
            "lastName": "Avatar",
            "avatar": { "kind": "hologram", "name": "x" }
        }),
    );
    assert_eq!(code, "bad_params");

    // The campus cannot go while the teacher points at it.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "campuses.delete",
        json!({ "campusId": campus_id }),
    );
    assert_eq!(code, "conflict");

    // Deactivated teachers drop out of the default listing.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "teachers.update",
        json!({ "teacherId": teacher_id, "patch": { "active": false } }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.list",
        json!({ "campusId": campus_id }),
    );
    assert_eq!(
        listed.get("teachers").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "teachers.list",
        json!({ "campusId": campus_id, "includeInactive": true }),
    );
    assert_eq!(
        listed.get("teachers").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "campuses.delete",
        json!({ "campusId": campus_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "15", "campuses.list", json!({}));
    assert_eq!(
        listed.get("campuses").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn campus_updates_reject_unknown_fields() {
    let workspace = temp_dir("schooldesk-campus-patch");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "campuses.create",
        json!({ "name": "Hillcrest" }),
    );
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "campuses.update",
        json!({ "campusId": campus_id, "patch": { "address": "12 Hill Rd" } }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "campuses.update",
        json!({ "campusId": campus_id, "patch": { "mascot": "owl" } }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(&mut stdin, &mut reader, "5", "campuses.list", json!({}));
    let campuses = listed.get("campuses").and_then(|v| v.as_array()).expect("campuses");
    assert_eq!(
        campuses[0].get("address").and_then(|v| v.as_str()),
        Some("12 Hill Rd")
    );
}
