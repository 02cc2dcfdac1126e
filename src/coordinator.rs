use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::HovalClient;
use crate::error::RefreshError;
use crate::fan::resolve_fan_speed;
use crate::protocol::unwrap_page;
use crate::schedule::{normalize_program_key, program_names, resolve_program_phase, Schedule};
use crate::types::{
    live_values_map, Circuit, CircuitEntry, CircuitKey, CircuitType, Event, LiveValue, Plant,
    PlantEntry, Snapshot, TemporaryDuration, TurnOnMode, Weather,
};
use crate::Result;

const NEW_CIRCUITS_CHANNEL_SIZE: usize = 16;

/// Polling and control tuning. Every field has a sensible default.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub scan_interval: Duration,
    /// How long a fetched circuit schedule is reused before it is fetched again.
    pub program_cache_ttl: Duration,
    /// Wait between a control write and the follow-up refresh.
    pub settle_delay: Duration,
    pub max_events: usize,
    pub override_duration: TemporaryDuration,
    pub turn_on_mode: TurnOnMode,
    pub debounce_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            program_cache_ttl: Duration::from_secs(3600),
            settle_delay: Duration::from_secs(2),
            max_events: 10,
            override_duration: TemporaryDuration::default(),
            turn_on_mode: TurnOnMode::default(),
            debounce_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Clone)]
struct CachedSchedule {
    schedule: Schedule,
    fetched_at: Instant,
}

/// Owns the merged plant state and everything scoped to one session:
/// program cache, optimistic overrides, the known-circuit set and the
/// control lock.
pub struct Coordinator {
    client: Arc<HovalClient>,
    config: CoordinatorConfig,
    snapshot: watch::Sender<Arc<Snapshot>>,
    new_circuits: broadcast::Sender<Vec<CircuitKey>>,
    overrides: Mutex<HashMap<String, String>>,
    programs: Mutex<HashMap<(String, String), CachedSchedule>>,
    known: Mutex<Option<HashSet<CircuitKey>>>,
    control_lock: tokio::sync::Mutex<()>,
    refresh_signal: Notify,
}

impl Coordinator {
    pub fn new(client: Arc<HovalClient>, config: CoordinatorConfig) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::default()));
        let (new_circuits, _) = broadcast::channel(NEW_CIRCUITS_CHANNEL_SIZE);
        Self {
            client,
            config,
            snapshot,
            new_circuits,
            overrides: Mutex::new(HashMap::new()),
            programs: Mutex::new(HashMap::new()),
            known: Mutex::new(None),
            control_lock: tokio::sync::Mutex::new(()),
            refresh_signal: Notify::new(),
        }
    }

    pub fn client(&self) -> &Arc<HovalClient> {
        &self.client
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Most recently published snapshot. Empty until the first good cycle.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    /// Circuits that appeared after the first cycle, one message per cycle.
    pub fn new_circuits(&self) -> broadcast::Receiver<Vec<CircuitKey>> {
        self.new_circuits.subscribe()
    }

    /// Asks [`run`](Self::run) for a cycle soon. Repeated calls before the
    /// loop wakes up collapse into one cycle.
    pub fn request_refresh(&self) {
        self.refresh_signal.notify_one();
    }

    // -- Optimistic overrides --

    pub fn mode_override(&self, circuit_path: &str) -> Option<String> {
        let overrides = self.overrides.lock().unwrap_or_else(|e| e.into_inner());
        overrides.get(circuit_path).cloned()
    }

    pub fn set_mode_override(&self, circuit_path: &str, mode: &str) {
        let mut overrides = self.overrides.lock().unwrap_or_else(|e| e.into_inner());
        overrides.insert(circuit_path.to_string(), mode.to_string());
    }

    fn clear_overrides(&self) {
        let mut overrides = self.overrides.lock().unwrap_or_else(|e| e.into_inner());
        overrides.clear();
    }

    /// Override if one is pending, otherwise the polled operation mode.
    pub fn effective_mode(&self, plant_id: &str, circuit_path: &str) -> Option<String> {
        self.mode_override(circuit_path).or_else(|| {
            self.snapshot()
                .circuit(plant_id, circuit_path)
                .and_then(|c| c.operation_mode.clone())
        })
    }

    // -- Control --

    /// Runs one write under the shared control lock, records the expected
    /// mode for the circuit, waits for the device to settle and then asks
    /// for a refresh.
    pub async fn run_control_and_refresh<F, Fut>(
        &self,
        circuit_path: &str,
        resulting_mode: Option<&str>,
        action: F,
    ) -> Result<()>
    where
        F: FnOnce(Arc<HovalClient>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _guard = self.control_lock.lock().await;
        action(self.client.clone()).await?;
        if let Some(mode) = resulting_mode {
            debug!(circuit_path, mode, "optimistic mode override");
            self.set_mode_override(circuit_path, mode);
        }
        tokio::time::sleep(self.config.settle_delay).await;
        self.request_refresh();
        Ok(())
    }

    // -- Polling --

    /// Polls on the scan interval and whenever a refresh is requested until
    /// `cancel` fires. A failed cycle keeps the previous snapshot.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.refresh_signal.notified() => interval.reset(),
                _ = interval.tick() => {}
            }
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "refresh cycle failed");
            }
        }
        debug!("poll loop stopped");
    }

    pub async fn refresh(&self) -> std::result::Result<Arc<Snapshot>, RefreshError> {
        self.refresh_at(chrono::Local::now().naive_local()).await
    }

    /// One refresh cycle, resolving schedules against `now`.
    pub async fn refresh_at(
        &self,
        now: NaiveDateTime,
    ) -> std::result::Result<Arc<Snapshot>, RefreshError> {
        self.clear_overrides();

        let snapshot = match self.build_snapshot(now).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                if e.is_auth() {
                    warn!(error = %e, "authentication failed, dropping tokens");
                    self.client.invalidate_tokens().await;
                }
                return Err(e.into());
            }
        };

        let added = self.track_circuits(&snapshot);
        self.snapshot.send_replace(snapshot.clone());

        if !added.is_empty() {
            info!(count = added.len(), "new circuits discovered");
            // No subscribers is fine.
            let _ = self.new_circuits.send(added);
        }
        Ok(snapshot)
    }

    async fn build_snapshot(&self, now: NaiveDateTime) -> Result<Snapshot> {
        let raw = self.client.get_plants().await?;

        let mut pending = Vec::new();
        for value in unwrap_page(raw) {
            let entry: PlantEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping malformed plant entry");
                    continue;
                }
            };
            let Some(plant_id) = entry.plant_external_id.filter(|id| !id.is_empty()) else {
                debug!("skipping plant without plantExternalId");
                continue;
            };
            let name = entry
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| plant_id.clone());
            let is_online = entry.is_online.unwrap_or(true);
            pending.push(self.build_plant(plant_id, name, is_online, now));
        }

        let mut snapshot = Snapshot::default();
        for plant in join_all(pending).await {
            let plant = plant?;
            snapshot.plants.insert(plant.plant_id.clone(), plant);
        }
        Ok(snapshot)
    }

    async fn build_plant(
        &self,
        plant_id: String,
        name: String,
        is_online: bool,
        now: NaiveDateTime,
    ) -> Result<Plant> {
        let mut plant = Plant {
            plant_id,
            name,
            is_online,
            ..Default::default()
        };
        let id = plant.plant_id.clone();

        if !is_online {
            debug!(plant_id = %id, "plant offline, skipping fetches");
            self.client.invalidate_plant_token(&id);
            return Ok(plant);
        }

        // Circuits first: this also primes the plant access token for the
        // concurrent fetches below.
        let entries = best_effort("circuits", &id, self.client.get_circuits(&id).await)?
            .map(parse_circuit_entries)
            .unwrap_or_default();

        let circuit_futs = entries.into_iter().filter_map(|entry| {
            let circuit_type = entry.supported_type()?;
            Some(self.build_circuit(&id, entry, circuit_type, now))
        });

        let (circuits, latest, events, weather) = tokio::join!(
            join_all(circuit_futs),
            self.client.get_latest_event(&id),
            self.client.get_events(&id),
            self.client.get_weather(&id),
        );

        for circuit in circuits {
            let circuit = circuit?;
            plant.circuits.insert(circuit.path.clone(), circuit);
        }

        plant.latest_event = best_effort("latest event", &id, latest)?
            .and_then(|raw| Event::from_json(&raw));

        if let Some(raw) = best_effort("events", &id, events)? {
            let mut events: Vec<Event> = unwrap_page(raw)
                .iter()
                .filter_map(Event::from_json)
                .collect();
            events.sort_by(|a, b| b.occurred_at().cmp(&a.occurred_at()));
            events.truncate(self.config.max_events);
            plant.events = events;
        }

        plant.weather = best_effort("weather", &id, weather)?.and_then(Weather::from_json);

        plant.has_error = plant.circuits.values().any(|c| c.has_error)
            || plant.latest_event.as_ref().is_some_and(Event::is_blocking)
            || plant.events.iter().any(Event::is_blocking);

        trace!(
            plant_id = %id,
            circuits = plant.circuits.len(),
            events = plant.events.len(),
            has_error = plant.has_error,
            "plant refreshed"
        );
        Ok(plant)
    }

    async fn build_circuit(
        &self,
        plant_id: &str,
        entry: CircuitEntry,
        circuit_type: CircuitType,
        now: NaiveDateTime,
    ) -> Result<Circuit> {
        let (live, schedule) = tokio::join!(
            self.client
                .get_live_values(plant_id, &entry.path, circuit_type.as_hoval_str()),
            self.schedule_for(plant_id, &entry.path),
        );

        let live_values = best_effort("live values", plant_id, live)?
            .and_then(|raw| match serde_json::from_value::<Vec<LiveValue>>(raw) {
                Ok(values) => Some(live_values_map(values)),
                Err(e) => {
                    debug!(plant_id, path = %entry.path, error = %e, "malformed live values");
                    None
                }
            })
            .unwrap_or_default();
        let schedule = schedule?;

        let active_program = normalize_program_key(entry.active_program.as_deref());
        let phase = resolve_program_phase(schedule.as_ref(), active_program.as_deref(), now);

        let mut circuit = Circuit {
            circuit_type,
            name: entry
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| circuit_type.as_hoval_str().to_string()),
            path: entry.path,
            operation_mode: entry.operation_mode,
            active_program,
            target_air_volume: entry.target_air_volume,
            target_air_humidity: entry.target_air_humidity,
            is_air_quality_guided: entry.is_air_quality_guided,
            has_error: entry.has_error,
            live_values,
            active_week_name: phase.week_name,
            active_day_program_name: phase.day_name,
            program_value: phase.value,
            program_names: program_names(schedule.as_ref()),
            fan_speed: None,
        };
        if circuit_type == CircuitType::Hv {
            circuit.fan_speed = Some(resolve_fan_speed(Some(&circuit)));
        }
        Ok(circuit)
    }

    /// Cached schedule while fresh. A failed or malformed fetch falls back to
    /// the stale entry, if any.
    async fn schedule_for(&self, plant_id: &str, circuit_path: &str) -> Result<Option<Schedule>> {
        let key = (plant_id.to_string(), circuit_path.to_string());
        let cached = {
            let programs = self.programs.lock().unwrap_or_else(|e| e.into_inner());
            programs.get(&key).cloned()
        };
        if let Some(entry) = &cached
            && entry.fetched_at.elapsed() < self.config.program_cache_ttl
        {
            return Ok(Some(entry.schedule.clone()));
        }

        let stale = cached.map(|c| c.schedule);
        let fetched = self.client.get_programs(plant_id, circuit_path).await;
        let Some(raw) = best_effort("programs", plant_id, fetched)? else {
            return Ok(stale);
        };

        match serde_json::from_value::<Schedule>(raw) {
            Ok(schedule) => {
                let mut programs = self.programs.lock().unwrap_or_else(|e| e.into_inner());
                programs.insert(
                    key,
                    CachedSchedule {
                        schedule: schedule.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(Some(schedule))
            }
            Err(e) => {
                debug!(plant_id, circuit_path, error = %e, "malformed programs response");
                Ok(stale)
            }
        }
    }

    /// Updates the known-circuit set and returns keys not seen before. The
    /// first cycle only seeds the set.
    fn track_circuits(&self, snapshot: &Snapshot) -> Vec<CircuitKey> {
        let current: HashSet<CircuitKey> = snapshot.circuit_keys().collect();
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        let mut added: Vec<CircuitKey> = match known.as_ref() {
            Some(previous) => current.difference(previous).cloned().collect(),
            None => Vec::new(),
        };
        added.sort();
        *known = Some(current);
        added
    }
}

/// Sub-fetch failures leave the field empty. Auth failures still end the cycle.
fn best_effort<T>(what: &str, plant_id: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_auth() => Err(e),
        Err(e) => {
            debug!(plant_id, error = %e, "{what} unavailable");
            Ok(None)
        }
    }
}

fn parse_circuit_entries(raw: Value) -> Vec<CircuitEntry> {
    unwrap_page(raw)
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<CircuitEntry>(v) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping malformed circuit entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator() -> Coordinator {
        let client = HovalClient::builder("a", "b").build().unwrap();
        Coordinator::new(Arc::new(client), CoordinatorConfig::default())
    }

    #[test]
    fn config_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(60));
        assert_eq!(config.max_events, 10);
        assert_eq!(config.override_duration, TemporaryDuration::FourHours);
        assert_eq!(config.turn_on_mode, TurnOnMode::Resume);
    }

    #[test]
    fn override_is_per_circuit() {
        let coord = coordinator();
        coord.set_mode_override("1.2.3", "standby");
        assert_eq!(coord.mode_override("1.2.3").as_deref(), Some("standby"));
        assert_eq!(coord.mode_override("4.5.6"), None);
        coord.clear_overrides();
        assert_eq!(coord.mode_override("1.2.3"), None);
    }

    fn vent(path: &str) -> Circuit {
        Circuit {
            circuit_type: CircuitType::Hv,
            path: path.into(),
            name: "Vent".into(),
            operation_mode: None,
            active_program: None,
            target_air_volume: None,
            target_air_humidity: None,
            is_air_quality_guided: false,
            has_error: false,
            live_values: Default::default(),
            active_week_name: None,
            active_day_program_name: None,
            program_value: None,
            program_names: Default::default(),
            fan_speed: None,
        }
    }

    fn snapshot_with(paths: &[&str]) -> Snapshot {
        let mut plant = Plant {
            plant_id: "p1".into(),
            ..Default::default()
        };
        for path in paths {
            plant.circuits.insert(path.to_string(), vent(path));
        }
        let mut snapshot = Snapshot::default();
        snapshot.plants.insert("p1".into(), plant);
        snapshot
    }

    #[test]
    fn first_cycle_seeds_known_set() {
        let coord = coordinator();
        assert!(coord.track_circuits(&snapshot_with(&["1.1.1"])).is_empty());
        assert!(coord.track_circuits(&snapshot_with(&["1.1.1"])).is_empty());

        let added = coord.track_circuits(&snapshot_with(&["1.1.1", "2.2.2"]));
        assert_eq!(
            added,
            vec![CircuitKey {
                plant_id: "p1".into(),
                path: "2.2.2".into()
            }]
        );
    }

    #[test]
    fn best_effort_swallows_api_errors_only() {
        let api: Result<u8> = Err(crate::Error::api("boom"));
        assert!(matches!(best_effort("x", "p1", api), Ok(None)));
        let auth: Result<u8> = Err(crate::Error::Auth("nope".into()));
        assert!(best_effort("x", "p1", auth).is_err());
    }

    #[test]
    fn malformed_circuit_entries_are_skipped() {
        let entries = parse_circuit_entries(json!([
            {"path": "1.1.1", "type": "HV", "selectable": true},
            {"type": "HK"},
            "garbage"
        ]));
        assert_eq!(entries.len(), 1);
    }
}
