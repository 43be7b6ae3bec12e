//! Gateway traits between the control loop and the outside world.
//!
//! The host simulator, the ESP32 firmware and the tests each provide their own
//! implementations; [`ControlLoop`](crate::control::ControlLoop) only sees these.

use crate::{
    error::SyncError,
    types::{RemoteUpdate, TelemetryValue},
};

/// Read side: level switch and temperature probe.
pub trait SensorGateway {
    /// `true` when the level switch reports water.
    fn water_present(&mut self) -> bool;

    /// Latest probe reading in °C, or
    /// [`DISCONNECT_SENTINEL_C`](crate::types::DISCONNECT_SENTINEL_C) when the
    /// probe could not be read.
    fn temperature_c(&mut self) -> f32;
}

/// Write side: the two relays.
pub trait ActuatorGateway {
    fn set_bubbles(&mut self, energized: bool);

    fn set_heater(&mut self, energized: bool);

    /// De-energize everything.
    fn all_off(&mut self) {
        self.set_heater(false);
        self.set_bubbles(false);
    }
}

/// Key/value synchronization with the remote control plane.
pub trait RemoteStateSync {
    fn is_connected(&self) -> bool;

    /// Blocking, bounded attempt to bring the session back.
    fn reconnect(&mut self) -> Result<(), SyncError>;

    /// Drain inbound desired-state updates in arrival order.
    fn poll(&mut self) -> Vec<RemoteUpdate>;

    fn publish(&mut self, path: &str, value: &TelemetryValue) -> Result<(), SyncError>;

    /// Publish a group of values; stops at the first failure.
    fn publish_all(&mut self, entries: &[(&str, TelemetryValue)]) -> Result<(), SyncError> {
        for (path, value) in entries {
            self.publish(path, value)?;
        }
        Ok(())
    }

    fn log_error(&mut self, message: &str) -> Result<(), SyncError>;
}
