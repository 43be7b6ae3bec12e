//! Simulated tub for host runs: a level switch, a probe and a first-order
//! thermal model driven by the relays.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tracing::info;

use jacuzzi_common::{
    command::parse_bool_payload, ActuatorGateway, SensorGateway, DISCONNECT_SENTINEL_C,
    SIM_PATH_PROBE, SIM_PATH_WATER,
};

const AMBIENT_C: f32 = 22.0;
const HEAT_RATE_C_PER_S: f32 = 0.05;
const COOLING_FRACTION_PER_S: f32 = 0.002;

#[derive(Debug)]
pub struct SimTub {
    pub water_present: bool,
    pub probe_connected: bool,
    pub bubbles: bool,
    pub heater: bool,
    pub temperature_c: f32,
    last_step: Instant,
}

impl SimTub {
    pub fn new(water_present: bool, temperature_c: f32) -> Self {
        Self {
            water_present,
            probe_connected: true,
            bubbles: false,
            heater: false,
            temperature_c,
            last_step: Instant::now(),
        }
    }

    fn step_to(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_step).as_secs_f32();
        self.last_step = now;

        if self.heater && self.bubbles && self.water_present {
            self.temperature_c += HEAT_RATE_C_PER_S * dt;
        } else {
            let fraction = (COOLING_FRACTION_PER_S * dt).min(1.0);
            self.temperature_c += (AMBIENT_C - self.temperature_c) * fraction;
        }
    }
}

pub type SharedTub = Arc<Mutex<SimTub>>;

fn lock(tub: &SharedTub) -> MutexGuard<'_, SimTub> {
    tub.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle a `sim/{path}` message. Returns `false` for unknown paths.
pub fn apply_sim_command(tub: &SharedTub, path: &str, payload: &str) -> bool {
    let value = parse_bool_payload(payload);
    let mut tub = lock(tub);
    match path {
        SIM_PATH_WATER => tub.water_present = value,
        SIM_PATH_PROBE => tub.probe_connected = value,
        _ => return false,
    }
    info!("sim {path} = {value}");
    true
}

pub struct SimSensors {
    tub: SharedTub,
}

impl SimSensors {
    pub fn new(tub: SharedTub) -> Self {
        Self { tub }
    }
}

impl SensorGateway for SimSensors {
    fn water_present(&mut self) -> bool {
        lock(&self.tub).water_present
    }

    fn temperature_c(&mut self) -> f32 {
        let mut tub = lock(&self.tub);
        tub.step_to(Instant::now());
        if tub.probe_connected {
            tub.temperature_c
        } else {
            DISCONNECT_SENTINEL_C
        }
    }
}

pub struct SimRelays {
    tub: SharedTub,
}

impl SimRelays {
    pub fn new(tub: SharedTub) -> Self {
        Self { tub }
    }
}

impl ActuatorGateway for SimRelays {
    fn set_bubbles(&mut self, energized: bool) {
        let mut tub = lock(&self.tub);
        if tub.bubbles != energized {
            tub.step_to(Instant::now());
            info!("bubbles relay {}", if energized { "ON" } else { "OFF" });
        }
        tub.bubbles = energized;
    }

    fn set_heater(&mut self, energized: bool) {
        let mut tub = lock(&self.tub);
        if tub.heater != energized {
            tub.step_to(Instant::now());
            info!("heater relay {}", if energized { "ON" } else { "OFF" });
        }
        tub.heater = energized;
    }
}
