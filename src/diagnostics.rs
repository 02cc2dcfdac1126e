use serde_json::{json, Map, Value};

use crate::coordinator::Coordinator;

pub const REDACTED: &str = "**REDACTED**";

pub const REDACT_CONFIG: &[&str] = &["password", "email"];

pub const REDACT_SNAPSHOT: &[&str] = &[
    "token",
    "id_token",
    "plant_access_token",
    "plant_id",
    "plantExternalId",
    "name",
    "description",
    "source_path",
];

/// Replaces the value of every object key listed in `keys`, at any depth.
/// Nulls are left alone so absent data stays recognisable.
pub fn redact(value: Value, keys: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    if keys.contains(&k.as_str()) && !v.is_null() {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, redact(v, keys))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| redact(v, keys)).collect()),
        other => other,
    }
}

/// Configuration and current snapshot with credentials, identifiers and
/// user-chosen names removed. Plants are keyed by position since their map
/// keys are plant ids.
pub fn diagnostics(coordinator: &Coordinator) -> Value {
    let client = coordinator.client();
    let credentials = client.credentials();
    let config = coordinator.config();

    let config_entry = json!({
        "email": credentials.email,
        "password": REDACTED,
        "base_url": client.base_url(),
        "max_attempts": client.max_attempts(),
        "scan_interval_secs": config.scan_interval.as_secs(),
        "program_cache_ttl_secs": config.program_cache_ttl.as_secs(),
        "override_duration": config.override_duration.as_hoval_str(),
        "turn_on_mode": config.turn_on_mode,
    });

    let snapshot = coordinator.snapshot();
    let plants: Map<String, Value> = snapshot
        .plants
        .values()
        .enumerate()
        .map(|(i, plant)| {
            let value = serde_json::to_value(plant).unwrap_or(Value::Null);
            (format!("plant_{i}"), redact(value, REDACT_SNAPSHOT))
        })
        .collect();

    json!({
        "config_entry": redact(config_entry, REDACT_CONFIG),
        "coordinator_data": { "plants": plants },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HovalClient;
    use crate::coordinator::CoordinatorConfig;
    use std::sync::Arc;

    #[test]
    fn nested_keys_are_redacted() {
        let value = json!({
            "plant_id": "abc",
            "circuits": {
                "1.2.3": {"name": "Living room", "path": "1.2.3"}
            },
            "events": [{"source_path": "1.2.3", "description": "Filter", "code": 7}],
            "latest_event": {"description": null}
        });
        let out = redact(value, REDACT_SNAPSHOT);
        assert_eq!(out["plant_id"], REDACTED);
        assert_eq!(out["circuits"]["1.2.3"]["name"], REDACTED);
        assert_eq!(out["circuits"]["1.2.3"]["path"], "1.2.3");
        assert_eq!(out["events"][0]["source_path"], REDACTED);
        assert_eq!(out["events"][0]["code"], 7);
        assert!(out["latest_event"]["description"].is_null());
    }

    #[test]
    fn redaction_sets_cover_credentials_and_identifiers() {
        for key in ["password", "email"] {
            assert!(REDACT_CONFIG.contains(&key));
        }
        for key in ["token", "id_token", "plant_access_token", "plant_id", "plantExternalId"] {
            assert!(REDACT_SNAPSHOT.contains(&key));
        }
    }

    #[test]
    fn dump_hides_credentials() {
        let client = HovalClient::builder("me@example.com", "hunter2").build().unwrap();
        let coordinator = Coordinator::new(Arc::new(client), CoordinatorConfig::default());
        let dump = diagnostics(&coordinator);
        let text = dump.to_string();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("me@example.com"));
        assert_eq!(dump["config_entry"]["override_duration"], "FOUR");
        assert_eq!(dump["config_entry"]["turn_on_mode"], "resume");
    }
}
