mod capability;
mod client;
mod coordinator;
mod debounce;
mod diagnostics;
mod diff;
mod error;
mod fan;
mod logger;
mod protocol;
mod schedule;
mod token;
mod types;

pub use capability::{
    HeatingCircuit, HvacAction, HvacMode, ProgramSelect, ReadableState, SettableMode,
    SettablePercentage, VentilationFan,
};
pub use client::{HovalClient, HovalClientBuilder};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use debounce::Debouncer;
pub use diagnostics::{diagnostics, redact, REDACTED, REDACT_CONFIG, REDACT_SNAPSHOT};
pub use error::{Error, RefreshError, Result};
pub use fan::{resolve_fan_speed, DEFAULT_FAN_SPEED};
pub use logger::MessageLogMode;
pub use protocol::{DEFAULT_BASE_URL, DEFAULT_CLIENT_ID, DEFAULT_IDP_URL, PLANT_ACCESS_HEADER};
pub use schedule::{
    normalize_program_key, program_names, resolve_program_phase, ActivePhase, DayProgram,
    DayPrograms, Phase, Schedule, TimeOfDay, WeekProgram, PROGRAM_OPTIONS,
};
pub use token::Credentials;
pub use types::*;
