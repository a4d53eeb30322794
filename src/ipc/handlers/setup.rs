use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Evidence,
    Calendar,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "evidence" => Some(Self::Evidence),
            "calendar" => Some(Self::Calendar),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Evidence => "setup.evidence",
            Self::Calendar => "setup.calendar",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Evidence => json!({
            "maxFileSizeMb": 25,
            "allowedKinds": ["document", "photo"]
        }),
        SetupSection::Calendar => json!({
            "defaultView": "month",
            "weekStartsMonday": false
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Evidence => match k.as_str() {
                "maxFileSizeMb" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 500)?));
                }
                "allowedKinds" => {
                    let arr = v
                        .as_array()
                        .ok_or_else(|| "allowedKinds must be an array".to_string())?;
                    let mut kinds = Vec::with_capacity(arr.len());
                    for item in arr {
                        let s = item
                            .as_str()
                            .map(|s| s.trim().to_ascii_lowercase())
                            .filter(|s| !s.is_empty())
                            .ok_or_else(|| "allowedKinds entries must be strings".to_string())?;
                        if s != "document" && s != "photo" {
                            return Err("allowedKinds entries must be one of: document, photo".into());
                        }
                        if !kinds.contains(&s) {
                            kinds.push(s);
                        }
                    }
                    if kinds.is_empty() {
                        return Err("allowedKinds must not be empty".into());
                    }
                    obj.insert(k.clone(), json!(kinds));
                }
                other => return Err(format!("unknown evidence field: {}", other)),
            },
            SetupSection::Calendar => match k.as_str() {
                "defaultView" => {
                    let s = v
                        .as_str()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .unwrap_or_default();
                    if s != "month" && s != "week" {
                        return Err("defaultView must be one of: month, week".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "weekStartsMonday" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                other => return Err(format!("unknown calendar field: {}", other)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    let mut value = default_section(section);
    if let Ok(Some(stored)) = db::settings_get_json(conn, section.key()) {
        if let (Some(base), Some(overlay)) = (value.as_object_mut(), stored.as_object()) {
            for (k, v) in overlay {
                base.insert(k.clone(), v.clone());
            }
        }
    }
    value
}

fn handle_setup_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(
        &req.id,
        json!({
            "evidence": load_section(conn, SetupSection::Evidence),
            "calendar": load_section(conn, SetupSection::Calendar),
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown section: {}", section_raw),
            None,
        );
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let mut current = load_section(conn, section);
    if let Err(message) = merge_section_patch(section, &mut current, patch) {
        return err(&req.id, "bad_params", message, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "section": section.key(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.open" => Some(handle_setup_open(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
