use log::{error, info, warn};

use crate::{
    config::TubConfig,
    permissions::{evaluate, is_probe_disconnected},
    ports::{ActuatorGateway, RemoteStateSync, SensorGateway},
    topics::{
        PATH_CAN_ACTIVE_BUBBLES, PATH_CAN_ACTIVE_HEATER, PATH_COUNTER, PATH_LEVEL_SENSOR,
        PATH_MILLIS, PATH_TEMP,
    },
    types::{DerivedPermissions, DesiredState, SensedState, TelemetryValue, TubStatus},
};

pub const PROBE_DISCONNECTED_MESSAGE: &str = "Temperature sensor disconnected";

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub connected: bool,
    /// `None` when the tick stopped at the connectivity gate.
    pub sensed: Option<SensedState>,
    pub permissions: DerivedPermissions,
    pub water_transition: bool,
    pub telemetry_published: bool,
}

impl TickReport {
    fn offline() -> Self {
        Self {
            connected: false,
            sensed: None,
            permissions: DerivedPermissions::default(),
            water_transition: false,
            telemetry_published: false,
        }
    }
}

pub struct ControlLoop<S, A, R> {
    config: TubConfig,
    sensors: S,
    actuators: A,
    remote: R,

    desired: DesiredState,
    water_present_previous: bool,
    probe_disconnected: bool,
    connected: bool,

    last_sensed: SensedState,
    last_permissions: DerivedPermissions,

    counter: u64,
    last_telemetry_ms: u64,
}

impl<S, A, R> ControlLoop<S, A, R>
where
    S: SensorGateway,
    A: ActuatorGateway,
    R: RemoteStateSync,
{
    pub fn new(mut config: TubConfig, sensors: S, mut actuators: A, remote: R) -> Self {
        config.sanitize();
        actuators.all_off();

        Self {
            config,
            sensors,
            actuators,
            remote,
            desired: DesiredState::default(),
            water_present_previous: false,
            probe_disconnected: false,
            connected: false,
            last_sensed: SensedState {
                water_present: false,
                water_present_previous: false,
                temperature_c: 0.0,
            },
            last_permissions: DerivedPermissions::default(),
            counter: 0,
            last_telemetry_ms: 0,
        }
    }

    pub fn config(&self) -> &TubConfig {
        &self.config
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        self.apply_remote_updates();

        if !self.ensure_connected() {
            self.last_permissions = DerivedPermissions::default();
            return TickReport::offline();
        }

        let water_present = self.sensors.water_present();
        let water_transition = water_present != self.water_present_previous;
        if water_transition {
            self.handle_water_transition(water_present, now_ms);
        }

        let periodic_due =
            now_ms.saturating_sub(self.last_telemetry_ms) > self.config.telemetry_interval_ms;

        let temperature_c = self.sensors.temperature_c();
        self.track_probe(temperature_c, periodic_due);

        let sensed = SensedState {
            water_present,
            water_present_previous: self.water_present_previous,
            temperature_c,
        };
        self.water_present_previous = water_present;

        let permissions = evaluate(&self.desired, &sensed, &self.config);
        self.actuators.set_bubbles(permissions.bubbles_energized);
        self.actuators.set_heater(permissions.heater_energized);

        self.last_sensed = sensed;
        self.last_permissions = permissions;

        if periodic_due {
            self.publish_snapshot(now_ms, &sensed, &permissions);
        }

        TickReport {
            connected: true,
            sensed: Some(sensed),
            permissions,
            water_transition,
            telemetry_published: periodic_due,
        }
    }

    pub fn status(&self, now_ms: u64) -> TubStatus {
        TubStatus {
            uptime_ms: now_ms,
            connected: self.connected,
            desired: self.desired,
            sensed: self.last_sensed,
            permissions: self.last_permissions,
            probe_disconnected: self.probe_disconnected,
            counter: self.counter,
        }
    }

    fn apply_remote_updates(&mut self) {
        for update in self.remote.poll() {
            match self.desired.apply(&update.path, &update.payload) {
                Ok(()) => info!("desired {} = {}", update.path, update.payload.trim()),
                Err(err) => warn!("rejected remote update: {err}"),
            }
        }
    }

    fn ensure_connected(&mut self) -> bool {
        if self.remote.is_connected() {
            if !self.connected {
                info!("remote session up");
            }
            self.connected = true;
            return true;
        }

        if self.connected {
            warn!("remote session lost; de-energizing relays");
        }
        self.connected = false;
        self.actuators.all_off();

        match self.remote.reconnect() {
            Ok(()) => {
                info!("remote session re-established");
                self.connected = true;
                true
            }
            Err(err) => {
                warn!("reconnect failed: {err}");
                false
            }
        }
    }

    fn handle_water_transition(&mut self, water_present: bool, now_ms: u64) {
        if water_present {
            info!("level sensor: water present");
        } else {
            self.actuators.all_off();
            warn!("level sensor: water lost; relays de-energized");
        }

        let entries = [
            (PATH_LEVEL_SENSOR, TelemetryValue::Bool(water_present)),
            (PATH_MILLIS, TelemetryValue::Int(now_ms)),
        ];
        if let Err(err) = self.remote.publish_all(&entries) {
            warn!("level sensor publish failed: {err}");
        }
    }

    fn track_probe(&mut self, temperature_c: f32, periodic_due: bool) {
        let disconnected = is_probe_disconnected(temperature_c);

        if disconnected && (!self.probe_disconnected || periodic_due) {
            error!("{PROBE_DISCONNECTED_MESSAGE}");
            if let Err(err) = self.remote.log_error(PROBE_DISCONNECTED_MESSAGE) {
                warn!("error log publish failed: {err}");
            }
        } else if !disconnected && self.probe_disconnected {
            info!("temperature sensor reconnected ({temperature_c:.2}°C)");
        }

        self.probe_disconnected = disconnected;
    }

    fn publish_snapshot(
        &mut self,
        now_ms: u64,
        sensed: &SensedState,
        permissions: &DerivedPermissions,
    ) {
        self.last_telemetry_ms = now_ms;
        self.counter = self.counter.saturating_add(1);

        let entries = [
            (PATH_COUNTER, TelemetryValue::Int(self.counter)),
            (PATH_TEMP, TelemetryValue::Float(sensed.temperature_c)),
            (
                PATH_CAN_ACTIVE_BUBBLES,
                TelemetryValue::Bool(permissions.bubbles_allowed),
            ),
            (
                PATH_CAN_ACTIVE_HEATER,
                TelemetryValue::Bool(permissions.heater_allowed),
            ),
            (PATH_MILLIS, TelemetryValue::Int(now_ms)),
        ];
        if let Err(err) = self.remote.publish_all(&entries) {
            warn!("telemetry publish failed: {err}");
        }

        info!(
            "{now_ms} active={} clean={} level={} bubbles={}>{} heater={}>{} temp={:.2}°C target={:.2}°C",
            self.desired.active,
            self.desired.cleaning,
            sensed.water_present,
            self.desired.bubbles_requested,
            permissions.bubbles_allowed,
            self.desired.heater_requested,
            permissions.heater_allowed,
            sensed.temperature_c,
            self.desired.target_temperature_c,
        );
    }
}
