//! Per-capability views over one circuit of the coordinator's snapshot.
//!
//! Each adapter implements only the traits its circuit type supports, so a
//! host can dispatch on capability instead of on circuit type.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::client::HovalClient;
use crate::coordinator::Coordinator;
use crate::debounce::Debouncer;
use crate::fan::LIVE_AIR_VOLUME;
use crate::schedule::PROGRAM_OPTIONS;
use crate::types::{Circuit, TurnOnMode, OPERATION_MODE_REGULAR, OPERATION_MODE_STANDBY};
use crate::{Error, Result};

const LIVE_ACTUAL_TEMPERATURE: &str = "actualTemperature";
const LIVE_ROOM_TEMPERATURE: &str = "roomTemperature";
const LIVE_TARGET_TEMPERATURE: &str = "targetTemperature";
const LIVE_CIRCUIT_STATUS: &str = "circuitStatus";

/// Programs that count as automatic operation for a heating circuit.
const AUTO_PROGRAMS: &[&str] = &["week1", "week2", "ecoMode"];

pub trait ReadableState {
    fn plant_id(&self) -> &str;
    fn circuit_path(&self) -> &str;
    /// The circuit as of the last published snapshot.
    fn circuit(&self) -> Option<Circuit>;

    fn available(&self) -> bool {
        self.circuit().is_some()
    }
}

#[async_trait]
pub trait SettableMode: Send + Sync {
    type Mode: Send + 'static;

    fn mode(&self) -> Option<Self::Mode>;
    async fn set_mode(&self, mode: Self::Mode) -> Result<()>;
}

#[async_trait]
pub trait SettablePercentage: Send + Sync {
    fn percentage(&self) -> Option<u8>;
    async fn set_percentage(&self, percentage: u8) -> Result<()>;
}

#[derive(Clone)]
struct CircuitHandle {
    coordinator: Arc<Coordinator>,
    plant_id: String,
    path: String,
}

impl CircuitHandle {
    fn circuit(&self) -> Option<Circuit> {
        self.coordinator
            .snapshot()
            .circuit(&self.plant_id, &self.path)
            .cloned()
    }

    fn effective_mode(&self) -> Option<String> {
        self.coordinator.effective_mode(&self.plant_id, &self.path)
    }

    fn is_standby(&self) -> bool {
        self.effective_mode().as_deref() == Some(OPERATION_MODE_STANDBY)
    }

    async fn control<F, Fut>(&self, resulting_mode: &str, action: F) -> Result<()>
    where
        F: FnOnce(Arc<HovalClient>, String, String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (plant_id, path) = (self.plant_id.clone(), self.path.clone());
        self.coordinator
            .run_control_and_refresh(&self.path, Some(resulting_mode), move |client| {
                action(client, plant_id, path)
            })
            .await
    }
}

// -- Ventilation --

/// Ventilation (HV) circuit as a variable-speed fan.
///
/// Speed changes are debounced; dropping the adapter cancels a change that
/// has not been sent yet.
pub struct VentilationFan {
    handle: CircuitHandle,
    debouncer: Debouncer,
    pending: Arc<Mutex<Option<u8>>>,
}

impl ReadableState for VentilationFan {
    fn plant_id(&self) -> &str {
        &self.handle.plant_id
    }

    fn circuit_path(&self) -> &str {
        &self.handle.path
    }

    fn circuit(&self) -> Option<Circuit> {
        self.handle.circuit()
    }
}

impl VentilationFan {
    pub fn new(coordinator: Arc<Coordinator>, plant_id: &str, circuit_path: &str) -> Self {
        Self {
            handle: CircuitHandle {
                coordinator,
                plant_id: plant_id.to_string(),
                path: circuit_path.to_string(),
            },
            debouncer: Debouncer::new(),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_on(&self) -> Option<bool> {
        self.handle.circuit()?;
        Some(!self.handle.is_standby())
    }

    fn pending(&self) -> Option<u8> {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_pending(&self, value: Option<u8>) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    /// With a percentage this is a (debounced) speed change. Otherwise
    /// ventilation resumes according to the configured turn-on mode.
    pub async fn turn_on(&self, percentage: Option<u8>) -> Result<()> {
        if let Some(percentage) = percentage {
            return self.set_percentage(percentage).await;
        }
        match self.handle.coordinator.config().turn_on_mode {
            TurnOnMode::Resume => {
                self.handle
                    .control(OPERATION_MODE_REGULAR, |client, plant, path| async move {
                        client.reset_circuit(&plant, &path).await
                    })
                    .await
            }
            mode => {
                let program = mode.program_key().unwrap_or("week1");
                self.handle
                    .control(OPERATION_MODE_REGULAR, move |client, plant, path| async move {
                        client.set_program(&plant, &path, program).await
                    })
                    .await
            }
        }
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.handle
            .control(OPERATION_MODE_STANDBY, |client, plant, path| async move {
                client
                    .set_circuit_mode(&plant, &path, OPERATION_MODE_STANDBY, None)
                    .await
            })
            .await
    }
}

#[async_trait]
impl SettablePercentage for VentilationFan {
    /// Pending value first so the UI follows the user immediately. Without
    /// live or target air volume the coordinator's resolved speed is used.
    fn percentage(&self) -> Option<u8> {
        if let Some(pending) = self.pending() {
            return Some(pending);
        }
        let circuit = self.handle.circuit()?;
        match circuit
            .live_f64(LIVE_AIR_VOLUME)
            .or(circuit.target_air_volume)
        {
            Some(value) => Some(value.trunc().clamp(0.0, 100.0) as u8),
            None => circuit.fan_speed,
        }
    }

    /// 0 switches the fan off. Anything else is sent as a temporary change
    /// once the value has been stable for the debounce delay.
    async fn set_percentage(&self, percentage: u8) -> Result<()> {
        if percentage == 0 {
            self.debouncer.cancel(&self.handle.path);
            self.set_pending(None);
            return self.turn_off().await;
        }

        let percentage = percentage.min(100);
        self.set_pending(Some(percentage));

        let config = self.handle.coordinator.config();
        let (delay, duration) = (config.debounce_delay, config.override_duration);
        let handle = self.handle.clone();
        let pending = self.pending.clone();
        debug!(circuit_path = %handle.path, percentage, "fan speed change scheduled");

        self.debouncer.schedule(&self.handle.path, delay, async move {
            *pending.lock().unwrap_or_else(|e| e.into_inner()) = None;
            let result = handle
                .control(OPERATION_MODE_REGULAR, move |client, plant, path| async move {
                    client
                        .set_temporary_change(&plant, &path, f64::from(percentage), duration)
                        .await
                })
                .await;
            if let Err(e) = result {
                warn!(circuit_path = %handle.path, error = %e, "fan speed change failed");
            }
        });
        Ok(())
    }
}

// -- Heating --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    /// A time program drives the setpoint.
    Auto,
    Heat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacAction {
    Off,
    Heating,
    Cooling,
    Idle,
}

/// Heating (HK) circuit as a thermostat.
pub struct HeatingCircuit {
    handle: CircuitHandle,
}

impl ReadableState for HeatingCircuit {
    fn plant_id(&self) -> &str {
        &self.handle.plant_id
    }

    fn circuit_path(&self) -> &str {
        &self.handle.path
    }

    fn circuit(&self) -> Option<Circuit> {
        self.handle.circuit()
    }
}

impl HeatingCircuit {
    pub fn new(coordinator: Arc<Coordinator>, plant_id: &str, circuit_path: &str) -> Self {
        Self {
            handle: CircuitHandle {
                coordinator,
                plant_id: plant_id.to_string(),
                path: circuit_path.to_string(),
            },
        }
    }

    pub fn current_temperature(&self) -> Option<f64> {
        let circuit = self.handle.circuit()?;
        let raw = circuit
            .live_values
            .get(LIVE_ACTUAL_TEMPERATURE)
            .or_else(|| circuit.live_values.get(LIVE_ROOM_TEMPERATURE))?;
        raw.trim().parse().ok()
    }

    /// Live setpoint, else the value of the active program phase.
    pub fn target_temperature(&self) -> Option<f64> {
        let circuit = self.handle.circuit()?;
        circuit
            .live_f64(LIVE_TARGET_TEMPERATURE)
            .or(circuit.program_value)
    }

    pub fn hvac_action(&self) -> Option<HvacAction> {
        let circuit = self.handle.circuit()?;
        if self.handle.is_standby() {
            return Some(HvacAction::Off);
        }
        let status = circuit
            .live_values
            .get(LIVE_CIRCUIT_STATUS)
            .map(|s| s.to_uppercase());
        Some(match status.as_deref() {
            Some("HEATING") => HvacAction::Heating,
            Some("COOLING") => HvacAction::Cooling,
            _ => HvacAction::Idle,
        })
    }

    /// Temporary setpoint change. The API expects tenths of a degree.
    pub async fn set_target_temperature(&self, celsius: f64) -> Result<()> {
        let duration = self.handle.coordinator.config().override_duration;
        let tenths = (celsius * 10.0).round();
        self.handle
            .control(OPERATION_MODE_REGULAR, move |client, plant, path| async move {
                client
                    .set_temporary_change(&plant, &path, tenths, duration)
                    .await
            })
            .await
    }
}

#[async_trait]
impl SettableMode for HeatingCircuit {
    type Mode = HvacMode;

    fn mode(&self) -> Option<HvacMode> {
        let circuit = self.handle.circuit()?;
        if self.handle.is_standby() {
            return Some(HvacMode::Off);
        }
        let auto = circuit
            .active_program
            .as_deref()
            .is_some_and(|p| AUTO_PROGRAMS.contains(&p));
        Some(if auto { HvacMode::Auto } else { HvacMode::Heat })
    }

    async fn set_mode(&self, mode: HvacMode) -> Result<()> {
        match mode {
            HvacMode::Off => {
                self.handle
                    .control(OPERATION_MODE_STANDBY, |client, plant, path| async move {
                        client
                            .set_circuit_mode(&plant, &path, OPERATION_MODE_STANDBY, None)
                            .await
                    })
                    .await
            }
            HvacMode::Auto | HvacMode::Heat => {
                self.handle
                    .control(OPERATION_MODE_REGULAR, |client, plant, path| async move {
                        client.reset_circuit(&plant, &path).await
                    })
                    .await
            }
        }
    }
}

// -- Program --

/// Active time program of any supported circuit as a selectable option.
pub struct ProgramSelect {
    handle: CircuitHandle,
}

impl ReadableState for ProgramSelect {
    fn plant_id(&self) -> &str {
        &self.handle.plant_id
    }

    fn circuit_path(&self) -> &str {
        &self.handle.path
    }

    fn circuit(&self) -> Option<Circuit> {
        self.handle.circuit()
    }
}

impl ProgramSelect {
    pub fn new(coordinator: Arc<Coordinator>, plant_id: &str, circuit_path: &str) -> Self {
        Self {
            handle: CircuitHandle {
                coordinator,
                plant_id: plant_id.to_string(),
                path: circuit_path.to_string(),
            },
        }
    }

    pub fn options(&self) -> &'static [&'static str] {
        PROGRAM_OPTIONS
    }

    /// Display name for `option`, preferring the week names set in the app.
    pub fn option_name(&self, option: &str) -> Option<String> {
        self.handle.circuit()?.program_names.get(option).cloned()
    }
}

#[async_trait]
impl SettableMode for ProgramSelect {
    type Mode = String;

    fn mode(&self) -> Option<String> {
        self.handle.circuit()?.active_program
    }

    async fn set_mode(&self, option: String) -> Result<()> {
        if !PROGRAM_OPTIONS.contains(&option.as_str()) {
            return Err(Error::api(format!("unknown program option: {option}")));
        }
        let resulting_mode = if option == OPERATION_MODE_STANDBY {
            OPERATION_MODE_STANDBY
        } else {
            OPERATION_MODE_REGULAR
        };
        debug!(circuit_path = %self.handle.path, option = %option, "selecting program");
        self.handle
            .control(resulting_mode, move |client, plant, path| async move {
                client.set_program(&plant, &path, &option).await
            })
            .await
    }
}
