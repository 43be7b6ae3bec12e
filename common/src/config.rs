use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TubConfig {
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    pub telemetry_interval_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub tick_interval_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for TubConfig {
    fn default() -> Self {
        Self {
            min_temp_c: 5.0,
            max_temp_c: 40.0,
            telemetry_interval_ms: 5_000,
            reconnect_attempts: 10,
            reconnect_delay_ms: 1_000,
            tick_interval_ms: 50,
            max_payload_bytes: 512,
        }
    }
}

impl TubConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        let bounds_valid = self.min_temp_c.is_finite()
            && self.max_temp_c.is_finite()
            && self.min_temp_c < self.max_temp_c;
        if !bounds_valid {
            self.min_temp_c = defaults.min_temp_c;
            self.max_temp_c = defaults.max_temp_c;
        }

        self.telemetry_interval_ms = self.telemetry_interval_ms.max(500);
        self.reconnect_attempts = self.reconnect_attempts.clamp(1, 60);
        // Each retry sleeps between watchdog feeds.
        self.reconnect_delay_ms = self.reconnect_delay_ms.clamp(100, 10_000);

        if self.max_payload_bytes == 0 {
            self.max_payload_bytes = defaults.max_payload_bytes;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_tls: bool,
    pub device_id: String,
    pub topic_root: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_tls: false,
            device_id: "tub-1".to_string(),
            topic_root: crate::topics::DEFAULT_TOPIC_ROOT.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        // Ids end up as MQTT topic levels, so wildcards and separators are stripped.
        self.device_id = sanitize_topic_level(&self.device_id, "tub-1");
        self.topic_root = sanitize_topic_level(&self.topic_root, crate::topics::DEFAULT_TOPIC_ROOT);

        if self.mqtt_port == 0 {
            self.mqtt_port = if self.mqtt_tls { 8883 } else { 1883 };
        }
    }
}

/// Operator-side policy run by the host alongside the tub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub enabled: bool,
    pub emergency_temp_c: f32,
    pub bubbles_rundown_ms: u64,
    pub session_timeout_ms: u64,
    pub cleaning_timeout_ms: u64,
    pub min_target_c: f32,
    pub max_target_c: f32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            emergency_temp_c: 41.0,
            bubbles_rundown_ms: 15_000,
            session_timeout_ms: 30 * 60 * 1_000,
            cleaning_timeout_ms: 10_000,
            min_target_c: 5.0,
            max_target_c: 40.0,
        }
    }
}

impl SupervisorConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.emergency_temp_c.is_finite() {
            self.emergency_temp_c = defaults.emergency_temp_c;
        }

        let targets_valid = self.min_target_c.is_finite()
            && self.max_target_c.is_finite()
            && self.min_target_c < self.max_target_c;
        if !targets_valid {
            self.min_target_c = defaults.min_target_c;
            self.max_target_c = defaults.max_target_c;
        }

        self.bubbles_rundown_ms = self.bubbles_rundown_ms.max(1_000);
        self.session_timeout_ms = self.session_timeout_ms.max(1_000);
        self.cleaning_timeout_ms = self.cleaning_timeout_ms.max(1_000);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tub: TubConfig,
    pub network: NetworkConfig,
    pub supervisor: SupervisorConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut runtime = serde_json::from_str::<Self>(raw)?;
        runtime.sanitize();
        Ok(runtime)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn sanitize(&mut self) {
        self.tub.sanitize();
        self.network.sanitize();
        self.supervisor.sanitize();
    }
}

fn sanitize_topic_level(value: &str, fallback: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '+' | '#') && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}
