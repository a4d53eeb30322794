
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn workspace_data_survives_restart() {
    let workspace = temp_dir("schooldesk-reopen");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
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
        json!({ "name": "Persistent Campus" }),
    );
    let campus_id = campus.get("campusId").and_then(|v| v.as_str()).expect("campusId").to_string();
    drop(stdin);
    let _ = child.wait();

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "4", "campuses.list", json!({}));
    let campuses = listed.get("campuses").and_then(|v| v.as_array()).expect("campuses");
    assert_eq!(campuses.len(), 1);
    assert_eq!(
        campuses[0].get("id").and_then(|v| v.as_str()),
        Some(campus_id.as_str())
    );
    assert_eq!(
        campuses[0].get("name").and_then(|v| v.as_str()),
        Some("Persistent Campus")
    );
}
