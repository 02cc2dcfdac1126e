//! Weekly time programs and the lookup of the phase active at a given time.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Program keys the v3 API accepts for activation, in display order.
pub const PROGRAM_OPTIONS: &[&str] = &["week1", "week2", "ecoMode", "standby", "constant"];

/// Legacy v1 program values and the v3 key they are shown as. Heuristic:
/// several v1 values collapse onto `week1`.
const V1_PROGRAM_MAP: &[(&str, &str)] = &[("tteControlled", "week1"), ("timePrograms", "week1")];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Schedule {
    pub week1: Option<WeekProgram>,
    pub week2: Option<WeekProgram>,
    pub day_programs: Option<DayPrograms>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeekProgram {
    pub name: Option<String>,
    /// Day-program id per weekday, Monday first.
    pub day_program_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DayPrograms {
    pub day_configurations: Vec<DayProgram>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayProgram {
    pub id: i64,
    pub name: Option<String>,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeOfDay {
    pub hours: u32,
    pub minutes: u32,
}

impl TimeOfDay {
    /// `None` for anything past 24:00, so bad server data never matches.
    pub fn minute_of_day(&self) -> Option<u32> {
        if self.minutes > 59 || self.hours > 24 || (self.hours == 24 && self.minutes > 0) {
            return None;
        }
        Some(self.hours * 60 + self.minutes)
    }
}

impl Phase {
    /// Half-open: a phase owns its start minute but not its end minute.
    pub fn contains(&self, minute_of_day: u32) -> bool {
        match (self.start.minute_of_day(), self.end.minute_of_day()) {
            (Some(start), Some(end)) => start <= minute_of_day && minute_of_day < end,
            _ => false,
        }
    }
}

impl Schedule {
    pub fn week(&self, program_key: Option<&str>) -> Option<&WeekProgram> {
        match program_key {
            Some("week2") => self.week2.as_ref().or(self.week1.as_ref()),
            _ => self.week1.as_ref(),
        }
    }

    fn day_program(&self, id: i64) -> Option<&DayProgram> {
        self.day_programs
            .as_ref()?
            .day_configurations
            .iter()
            .find(|d| d.id == id)
    }

    fn is_empty(&self) -> bool {
        self.day_programs
            .as_ref()
            .is_none_or(|d| d.day_configurations.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivePhase {
    pub week_name: Option<String>,
    pub day_name: Option<String>,
    pub value: Option<f64>,
}

/// Resolves which week, day program and phase value apply at `now`.
///
/// `program_key` picks the week (`week2` selects the second week, anything
/// else the first). The first phase in listed order whose `[start, end)`
/// interval holds the current minute wins.
pub fn resolve_program_phase(
    schedule: Option<&Schedule>,
    program_key: Option<&str>,
    now: NaiveDateTime,
) -> ActivePhase {
    let Some(schedule) = schedule.filter(|s| !s.is_empty()) else {
        return ActivePhase::default();
    };
    let Some(week) = schedule.week(program_key) else {
        return ActivePhase::default();
    };
    let week_name = week.name.clone();

    let weekday = now.weekday().num_days_from_monday() as usize;
    let Some(day) = week
        .day_program_ids
        .get(weekday)
        .and_then(|id| schedule.day_program(*id))
    else {
        return ActivePhase {
            week_name,
            ..Default::default()
        };
    };

    let minute = now.hour() * 60 + now.minute();
    let value = day
        .phases
        .iter()
        .find(|p| p.contains(minute))
        .and_then(|p| p.value);

    ActivePhase {
        week_name,
        day_name: day.name.clone(),
        value,
    }
}

/// Maps legacy v1 program values onto v3 keys; anything else passes through.
pub fn normalize_program_key(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let mapped = V1_PROGRAM_MAP
        .iter()
        .find(|(v1, _)| *v1 == raw)
        .map(|(_, v3)| *v3)
        .unwrap_or(raw);
    Some(mapped.to_string())
}

fn default_program_name(key: &str) -> &'static str {
    match key {
        "week1" => "Week 1",
        "week2" => "Week 2",
        "ecoMode" => "Eco mode",
        "standby" => "Standby",
        "constant" => "Constant",
        _ => "Program",
    }
}

/// Display names for every program option. Week names set in the vendor app
/// replace the defaults.
pub fn program_names(schedule: Option<&Schedule>) -> BTreeMap<String, String> {
    let mut names: BTreeMap<String, String> = PROGRAM_OPTIONS
        .iter()
        .map(|key| (key.to_string(), default_program_name(key).to_string()))
        .collect();

    if let Some(schedule) = schedule {
        for (key, week) in [("week1", &schedule.week1), ("week2", &schedule.week2)] {
            if let Some(name) = week.as_ref().and_then(|w| w.name.as_deref())
                && !name.trim().is_empty()
            {
                names.insert(key.to_string(), name.to_string());
            }
        }
    }
    names
}
