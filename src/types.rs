use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OPERATION_MODE_REGULAR: &str = "REGULAR";
pub const OPERATION_MODE_STANDBY: &str = "standby";
pub const OPERATION_MODE_CONSTANT: &str = "constant";
pub const OPERATION_MODE_MANUAL: &str = "manual";

/// Active events of these types flag the whole plant as erroneous.
pub const BLOCKING_EVENT_TYPES: &[&str] = &["blocking", "locking", "warning"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitType {
    /// Ventilation (HomeVent).
    Hv,
    /// Heating circuit.
    Hk,
    Bl,
    /// Domestic hot water.
    Ww,
    Friwa,
    Sol,
    Solb,
    Ps,
    Gw,
}

impl CircuitType {
    pub fn as_hoval_str(&self) -> &'static str {
        match self {
            CircuitType::Hv => "HV",
            CircuitType::Hk => "HK",
            CircuitType::Bl => "BL",
            CircuitType::Ww => "WW",
            CircuitType::Friwa => "FRIWA",
            CircuitType::Sol => "SOL",
            CircuitType::Solb => "SOLB",
            CircuitType::Ps => "PS",
            CircuitType::Gw => "GW",
        }
    }

    pub fn from_hoval_str(s: &str) -> Option<Self> {
        match s {
            "HV" => Some(CircuitType::Hv),
            "HK" => Some(CircuitType::Hk),
            "BL" => Some(CircuitType::Bl),
            "WW" => Some(CircuitType::Ww),
            "FRIWA" => Some(CircuitType::Friwa),
            "SOL" => Some(CircuitType::Sol),
            "SOLB" => Some(CircuitType::Solb),
            "PS" => Some(CircuitType::Ps),
            "GW" => Some(CircuitType::Gw),
            _ => None,
        }
    }

    /// Types that are surfaced in snapshots.
    pub fn is_supported(&self) -> bool {
        matches!(self, CircuitType::Hv | CircuitType::Hk)
    }
}

/// How long a temporary change holds before the schedule resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemporaryDuration {
    #[default]
    #[serde(rename = "FOUR")]
    FourHours,
    #[serde(rename = "MIDNIGHT")]
    Midnight,
}

impl TemporaryDuration {
    pub fn as_hoval_str(&self) -> &'static str {
        match self {
            TemporaryDuration::FourHours => "FOUR",
            TemporaryDuration::Midnight => "MIDNIGHT",
        }
    }

    pub fn from_hoval_str(s: &str) -> Option<Self> {
        match s {
            "FOUR" => Some(TemporaryDuration::FourHours),
            "MIDNIGHT" => Some(TemporaryDuration::Midnight),
            _ => None,
        }
    }
}

/// What turning a ventilation circuit back on does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOnMode {
    /// Reset the circuit so it resumes whatever it ran before standby.
    #[default]
    Resume,
    Week1,
    Week2,
}

impl TurnOnMode {
    pub fn program_key(&self) -> Option<&'static str> {
        match self {
            TurnOnMode::Resume => None,
            TurnOnMode::Week1 => Some("week1"),
            TurnOnMode::Week2 => Some("week2"),
        }
    }
}

// -- Wire shapes --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantEntry {
    pub plant_external_id: Option<String>,
    pub description: Option<String>,
    pub is_online: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitEntry {
    pub path: String,
    #[serde(rename = "type", default)]
    pub circuit_type: String,
    pub name: Option<String>,
    #[serde(default)]
    pub selectable: bool,
    pub operation_mode: Option<String>,
    pub active_program: Option<String>,
    pub target_air_volume: Option<f64>,
    pub target_air_humidity: Option<f64>,
    #[serde(default)]
    pub is_air_quality_guided: bool,
    #[serde(default)]
    pub has_error: bool,
}

impl CircuitEntry {
    /// Supported type and flagged selectable by the vendor.
    pub fn supported_type(&self) -> Option<CircuitType> {
        CircuitType::from_hoval_str(&self.circuit_type)
            .filter(|t| t.is_supported() && self.selectable)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveValue {
    pub key: String,
    pub value: Value,
}

/// Flattens the live-values list into key → string. Numbers are kept in
/// their textual form; nulls are dropped.
pub fn live_values_map(entries: Vec<LiveValue>) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .filter_map(|lv| {
            let text = match lv.value {
                Value::String(s) => s,
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((lv.key, text))
        })
        .collect()
}

// -- Snapshot --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct Event {
    pub event_type: Option<String>,
    pub description: Option<String>,
    pub time_occurred: Option<String>,
    pub time_resolved: Option<String>,
    pub source_path: Option<String>,
    pub code: Option<i64>,
}

impl Event {
    pub fn from_json(raw: &Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        serde_json::from_value(raw.clone()).ok()
    }

    /// An event stays active until the vendor records a resolution time.
    pub fn is_active(&self) -> bool {
        self.time_resolved.is_none()
    }

    pub fn is_blocking(&self) -> bool {
        self.is_active()
            && self
                .event_type
                .as_deref()
                .is_some_and(|t| BLOCKING_EVENT_TYPES.contains(&t))
    }

    /// Timestamps without an offset are read as UTC.
    pub fn occurred_at(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.time_occurred.as_deref()?;
        DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc().fixed_offset())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct WeatherEntry {
    pub weather_type: Option<String>,
    pub outside_temperature: Option<f64>,
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Weather {
    pub forecast: Vec<WeatherEntry>,
}

impl Weather {
    pub fn from_json(raw: Value) -> Option<Self> {
        let items = match raw {
            Value::Array(items) => items,
            Value::Object(_) => vec![raw],
            _ => return None,
        };
        let forecast: Vec<WeatherEntry> = items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if forecast.is_empty() {
            None
        } else {
            Some(Self { forecast })
        }
    }

    pub fn current(&self) -> Option<&WeatherEntry> {
        self.forecast.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Circuit {
    pub circuit_type: CircuitType,
    pub path: String,
    pub name: String,
    pub operation_mode: Option<String>,
    pub active_program: Option<String>,
    pub target_air_volume: Option<f64>,
    pub target_air_humidity: Option<f64>,
    pub is_air_quality_guided: bool,
    pub has_error: bool,
    pub live_values: BTreeMap<String, String>,
    pub active_week_name: Option<String>,
    pub active_day_program_name: Option<String>,
    /// Value of the schedule phase active at refresh time.
    pub program_value: Option<f64>,
    pub program_names: BTreeMap<String, String>,
    /// Effective ventilation percentage. HV circuits only.
    pub fan_speed: Option<u8>,
}

impl Circuit {
    pub fn live_f64(&self, key: &str) -> Option<f64> {
        self.live_values.get(key).and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plant {
    pub plant_id: String,
    pub name: String,
    pub is_online: bool,
    pub has_error: bool,
    pub circuits: BTreeMap<String, Circuit>,
    pub latest_event: Option<Event>,
    /// Most recent first.
    pub events: Vec<Event>,
    pub weather: Option<Weather>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub plants: BTreeMap<String, Plant>,
}

impl Snapshot {
    pub fn circuit(&self, plant_id: &str, circuit_path: &str) -> Option<&Circuit> {
        self.plants.get(plant_id)?.circuits.get(circuit_path)
    }

    pub fn circuit_keys(&self) -> impl Iterator<Item = CircuitKey> + '_ {
        self.plants.values().flat_map(|plant| {
            plant.circuits.keys().map(|path| CircuitKey {
                plant_id: plant.plant_id.clone(),
                path: path.clone(),
            })
        })
    }
}

/// Identity of a circuit across refresh cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitKey {
    pub plant_id: String,
    pub path: String,
}
