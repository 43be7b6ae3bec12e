use std::fmt;

use serde::Serialize;

/// DS18B20 "no device" reading.
pub const DISCONNECT_SENTINEL_C: f32 = -127.0;

/// Operator intent, mutated only by inbound remote updates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    pub active: bool,
    pub cleaning: bool,
    pub bubbles_requested: bool,
    pub heater_requested: bool,
    pub target_temperature_c: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensedState {
    pub water_present: bool,
    pub water_present_previous: bool,
    pub temperature_c: f32,
}

/// Tick-local permissions; recomputed from scratch every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedPermissions {
    pub bubbles_allowed: bool,
    pub heater_allowed: bool,
    pub bubbles_energized: bool,
    pub heater_energized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub path: String,
    pub payload: String,
}

impl RemoteUpdate {
    pub fn new(path: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryValue {
    Bool(bool),
    Int(u64),
    Float(f32),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => f.write_str(if *value { "1" } else { "0" }),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:.2}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TubStatus {
    pub uptime_ms: u64,
    pub connected: bool,
    pub desired: DesiredState,
    pub sensed: SensedState,
    pub permissions: DerivedPermissions,
    pub probe_disconnected: bool,
    pub counter: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_values_render_like_the_device() {
        assert_eq!(TelemetryValue::Bool(true).to_string(), "1");
        assert_eq!(TelemetryValue::Bool(false).to_string(), "0");
        assert_eq!(TelemetryValue::Int(42).to_string(), "42");
        assert_eq!(TelemetryValue::Float(21.5).to_string(), "21.50");
        assert_eq!(TelemetryValue::Float(DISCONNECT_SENTINEL_C).to_string(), "-127.00");
    }

    #[test]
    fn desired_state_boots_with_safe_defaults() {
        let desired = DesiredState::default();

        assert!(!desired.active);
        assert!(!desired.cleaning);
        assert!(!desired.bubbles_requested);
        assert!(!desired.heater_requested);
        assert_eq!(desired.target_temperature_c, 0.0);
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = TubStatus {
            uptime_ms: 1_000,
            connected: true,
            desired: DesiredState::default(),
            sensed: SensedState {
                water_present: true,
                water_present_previous: true,
                temperature_c: 30.0,
            },
            permissions: DerivedPermissions::default(),
            probe_disconnected: false,
            counter: 3,
        };

        let json = serde_json::to_value(status).unwrap();

        assert_eq!(json["sensed"]["waterPresent"], true);
        assert_eq!(json["desired"]["targetTemperatureC"], 0.0);
        assert_eq!(json["permissions"]["heaterEnergized"], false);
        assert_eq!(json["probeDisconnected"], false);
    }
}
