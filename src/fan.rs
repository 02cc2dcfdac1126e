use crate::types::Circuit;

/// Used when no candidate yields a usable air volume.
pub const DEFAULT_FAN_SPEED: u8 = 40;

pub const LIVE_AIR_VOLUME: &str = "airVolume";

/// The API rejects 0 %, so only whole values of at least 1 count.
fn accept(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    let whole = value.trunc();
    if whole < 1.0 {
        return None;
    }
    Some(whole.min(100.0) as u8)
}

/// Effective ventilation percentage: live air volume, then configured
/// target, then the active schedule phase, then [`DEFAULT_FAN_SPEED`].
pub fn resolve_fan_speed(circuit: Option<&Circuit>) -> u8 {
    let Some(circuit) = circuit else {
        return DEFAULT_FAN_SPEED;
    };
    circuit
        .live_f64(LIVE_AIR_VOLUME)
        .and_then(accept)
        .or_else(|| circuit.target_air_volume.and_then(accept))
        .or_else(|| circuit.program_value.and_then(accept))
        .unwrap_or(DEFAULT_FAN_SPEED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CircuitType;
    use std::collections::BTreeMap;

    fn circuit() -> Circuit {
        Circuit {
            circuit_type: CircuitType::Hv,
            path: "1.2.3".into(),
            name: "Test".into(),
            operation_mode: None,
            active_program: None,
            target_air_volume: None,
            target_air_humidity: None,
            is_air_quality_guided: false,
            has_error: false,
            live_values: BTreeMap::new(),
            active_week_name: None,
            active_day_program_name: None,
            program_value: None,
            program_names: BTreeMap::new(),
            fan_speed: None,
        }
    }

    fn with_live(value: &str) -> Circuit {
        let mut c = circuit();
        c.live_values.insert(LIVE_AIR_VOLUME.into(), value.into());
        c
    }

    #[test]
    fn no_circuit_returns_default() {
        assert_eq!(resolve_fan_speed(None), 40);
    }

    #[test]
    fn live_air_volume_wins() {
        let mut c = with_live("65");
        c.target_air_volume = Some(80.0);
        assert_eq!(resolve_fan_speed(Some(&c)), 65);
    }

    #[test]
    fn fractional_live_value_truncates() {
        assert_eq!(resolve_fan_speed(Some(&with_live("72.5"))), 72);
    }

    #[test]
    fn zero_live_value_falls_through() {
        let mut c = with_live("0");
        c.target_air_volume = Some(50.0);
        assert_eq!(resolve_fan_speed(Some(&c)), 50);
    }

    #[test]
    fn unparsable_live_value_falls_through() {
        let mut c = with_live("n/a");
        c.target_air_volume = Some(50.0);
        assert_eq!(resolve_fan_speed(Some(&c)), 50);
    }

    #[test]
    fn program_value_fallback() {
        let mut c = circuit();
        c.program_value = Some(55.0);
        assert_eq!(resolve_fan_speed(Some(&c)), 55);
    }

    #[test]
    fn all_missing_returns_default() {
        assert_eq!(resolve_fan_speed(Some(&circuit())), 40);
    }

    #[test]
    fn non_positive_candidates_are_skipped() {
        let mut c = with_live("-5");
        c.target_air_volume = Some(0.0);
        c.program_value = Some(0.4);
        assert_eq!(resolve_fan_speed(Some(&c)), 40);
    }
}
