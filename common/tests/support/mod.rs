//! Recording fakes for the three gateways.

#![allow(dead_code)]

use std::collections::VecDeque;

use jacuzzi_common::{
    ActuatorGateway, RemoteStateSync, RemoteUpdate, SensorGateway, SyncError, TelemetryValue,
};

pub struct FakeSensors {
    pub water_present: bool,
    pub temperature_c: f32,
    pub reads: usize,
}

impl FakeSensors {
    pub fn new(water_present: bool, temperature_c: f32) -> Self {
        Self {
            water_present,
            temperature_c,
            reads: 0,
        }
    }
}

impl SensorGateway for FakeSensors {
    fn water_present(&mut self) -> bool {
        self.reads += 1;
        self.water_present
    }

    fn temperature_c(&mut self) -> f32 {
        self.temperature_c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCall {
    Bubbles(bool),
    Heater(bool),
    AllOff,
}

#[derive(Default)]
pub struct RecordingRelays {
    pub calls: Vec<RelayCall>,
    pub bubbles: bool,
    pub heater: bool,
}

impl RecordingRelays {
    pub fn all_off_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == RelayCall::AllOff)
            .count()
    }
}

impl ActuatorGateway for RecordingRelays {
    fn set_bubbles(&mut self, energized: bool) {
        self.calls.push(RelayCall::Bubbles(energized));
        self.bubbles = energized;
    }

    fn set_heater(&mut self, energized: bool) {
        self.calls.push(RelayCall::Heater(energized));
        self.heater = energized;
    }

    fn all_off(&mut self) {
        self.calls.push(RelayCall::AllOff);
        self.bubbles = false;
        self.heater = false;
    }
}

pub struct FakeRemote {
    pub connected: bool,
    pub reconnect_succeeds: bool,
    pub reconnect_calls: u32,
    pub fail_publish: bool,
    pub inbox: VecDeque<RemoteUpdate>,
    pub published: Vec<(String, String)>,
    pub errors: Vec<String>,
}

impl FakeRemote {
    pub fn connected() -> Self {
        Self {
            connected: true,
            reconnect_succeeds: true,
            reconnect_calls: 0,
            fail_publish: false,
            inbox: VecDeque::new(),
            published: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, path: &str, payload: &str) {
        self.inbox.push_back(RemoteUpdate::new(path, payload));
    }

    pub fn values_for(&self, path: &str) -> Vec<&str> {
        self.published
            .iter()
            .filter(|(published_path, _)| published_path == path)
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

impl RemoteStateSync for FakeRemote {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reconnect(&mut self) -> Result<(), SyncError> {
        self.reconnect_calls += 1;
        if self.reconnect_succeeds {
            self.connected = true;
            Ok(())
        } else {
            Err(SyncError::ReconnectExhausted { attempts: 10 })
        }
    }

    fn poll(&mut self) -> Vec<RemoteUpdate> {
        self.inbox.drain(..).collect()
    }

    fn publish(&mut self, path: &str, value: &TelemetryValue) -> Result<(), SyncError> {
        if self.fail_publish {
            return Err(SyncError::Publish("broker unavailable".to_string()));
        }
        self.published.push((path.to_string(), value.to_string()));
        Ok(())
    }

    fn log_error(&mut self, message: &str) -> Result<(), SyncError> {
        self.errors.push(message.to_string());
        Ok(())
    }
}
