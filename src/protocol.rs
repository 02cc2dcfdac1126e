use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};

pub const DEFAULT_BASE_URL: &str = "https://azure-iot-prod.hoval.com/core";
pub const DEFAULT_IDP_URL: &str = "https://akwc5scsc.accounts.ondemand.com/oauth2/token";

/// Public OAuth2 client id of the Hoval Connect mobile app. Same for every user.
pub const DEFAULT_CLIENT_ID: &str = "991b54b2-7e67-47ef-81fe-572e21c59899";

pub const PLANT_ACCESS_HEADER: &str = "X-Plant-Access-Token";

pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

pub const PLANTS_PAGE_SIZE: &str = "50";

pub fn is_retryable(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

pub fn plants_path() -> &'static str {
    "/api/my-plants"
}

pub fn plant_settings_path(plant_id: &str) -> String {
    format!("/v1/plants/{plant_id}/settings")
}

pub fn circuits_path(plant_id: &str) -> String {
    format!("/v1/plants/{plant_id}/circuits")
}

pub fn live_values_path(plant_id: &str) -> String {
    format!("/v3/api/statistics/live-values/{plant_id}")
}

pub fn programs_path(plant_id: &str, circuit_path: &str) -> String {
    format!("/v3/plants/{plant_id}/circuits/{circuit_path}/programs")
}

pub fn weather_path(plant_id: &str) -> String {
    format!("/v2/api/weather/forecast/{plant_id}")
}

pub fn events_path(plant_id: &str) -> String {
    format!("/v1/plant-events/{plant_id}")
}

pub fn latest_event_path(plant_id: &str) -> String {
    format!("/v1/plant-events/{plant_id}/latest")
}

pub fn circuit_mode_path(plant_id: &str, circuit_path: &str, mode: &str) -> String {
    format!("/v1/plants/{plant_id}/circuits/{circuit_path}/{mode}")
}

pub fn circuit_settings_path(plant_id: &str, circuit_path: &str) -> String {
    format!("/v3/plants/{plant_id}/circuits/{circuit_path}/settings")
}

pub fn temporary_change_path(plant_id: &str, circuit_path: &str) -> String {
    format!("/v3/plants/{plant_id}/circuits/{circuit_path}/temporary-change")
}

pub fn set_program_path(plant_id: &str, circuit_path: &str, program: &str) -> String {
    format!("/v3/plants/{plant_id}/circuits/{circuit_path}/programs/{program}")
}

pub fn reset_path(plant_id: &str, circuit_path: &str) -> String {
    format!("/v3/plants/{plant_id}/circuits/{circuit_path}/reset")
}

pub fn password_grant_form<'a>(
    client_id: &'a str,
    username: &'a str,
    password: &'a SecretString,
) -> [(&'static str, &'a str); 5] {
    [
        ("grant_type", "password"),
        ("client_id", client_id),
        ("username", username),
        ("password", password.expose_secret()),
        ("scope", "openid"),
    ]
}

pub fn mode_value_data(value: Option<f64>) -> Option<Value> {
    value.map(|v| json!({ "value": v }))
}

pub fn temporary_change_data(value: f64, duration: &str) -> Value {
    json!({
        "value": value,
        "duration": duration,
    })
}

pub fn settings_data(settings: &Map<String, Value>) -> Value {
    Value::Object(settings.clone())
}

/// Pulls the identity token and its declared lifetime out of an IdP response.
pub fn parse_identity_response(body: &Value) -> Option<(String, Option<u64>)> {
    let token = body.get("id_token")?.as_str()?.to_string();
    let expires_in = body.get("expires_in").and_then(|v| v.as_u64());
    Some((token, expires_in))
}

pub fn parse_plant_token(settings: &Value) -> Option<String> {
    settings
        .get("token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Plants come back either as a bare array or wrapped in a page object.
pub fn unwrap_page(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("content") {
            Some(Value::Array(items)) => items,
            _ => vec![],
        },
        _ => vec![],
    }
}
