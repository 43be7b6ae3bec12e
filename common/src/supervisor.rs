//! Operator-side supervision of one tub.
//!
//! The supervisor mirrors the tub's desired and reported values from the
//! remote channel and enforces the policy the tub itself does not know about:
//!
//! - an over-temperature emergency cut of heater and bubbles,
//! - timed auto-off for user sessions and cleaning cycles,
//! - a staged shutdown that stops the heater first and lets the bubbles run
//!   on before clearing the cleaning flag,
//! - the operator menu (toggle session, set target, toggle cleaning, lock).
//!
//! Every decision is returned as desired-state writes ([`RemoteUpdate`]) for
//! the caller to publish; nothing here touches hardware or the network.

use std::fmt;

use log::{error, info, warn};
use serde::Serialize;

use crate::{
    command::{parse_bool_payload, parse_float_payload},
    config::SupervisorConfig,
    topics::{
        PATH_ACTIVE, PATH_BUBBLES, PATH_CAN_ACTIVE_HEATER, PATH_CLEAN, PATH_HEATER,
        PATH_LEVEL_SENSOR, PATH_TEMP, PATH_TEMP_TARGET,
    },
    types::{DesiredState, RemoteUpdate},
};

/// Last known values of one tub as seen on the remote channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantView {
    pub desired: DesiredState,
    pub water_present: bool,
    pub temperature_c: Option<f32>,
    pub heater_allowed: bool,
}

impl PlantView {
    /// Open for use: unlocked and filled.
    pub fn available(&self) -> bool {
        self.desired.active && self.water_present
    }

    pub fn running(&self) -> bool {
        self.desired.bubbles_requested || self.desired.heater_requested
    }

    fn observe_state(&mut self, path: &str, payload: &str) {
        match path {
            PATH_LEVEL_SENSOR => self.water_present = parse_bool_payload(payload),
            PATH_TEMP => self.temperature_c = parse_float_payload(payload),
            PATH_CAN_ACTIVE_HEATER => self.heater_allowed = parse_bool_payload(payload),
            _ => {}
        }
    }
}

/// Entries of the operator menu.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    ToggleSession,
    /// Missing or unparsable targets fall back to the configured maximum.
    SetTarget(Option<f32>),
    ToggleCleaning,
    ToggleLock,
}

impl OperatorCommand {
    /// Menu codes `1` to `4`.
    pub fn from_menu(code: &str, temperature_c: Option<f32>) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::ToggleSession),
            "2" => Some(Self::SetTarget(temperature_c)),
            "3" => Some(Self::ToggleCleaning),
            "4" => Some(Self::ToggleLock),
            _ => None,
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Self::ToggleCleaning | Self::ToggleLock)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorReply {
    SessionStarted { shutdown_in_ms: u64 },
    SessionStopping,
    SessionStopped,
    TargetSet { target_c: f32 },
    CleaningStarted { shutdown_in_ms: u64 },
    CleaningStopped,
    Unlocked,
    Locked,
    Unavailable,
    AdminOnly,
}

impl fmt::Display for OperatorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionStarted { shutdown_in_ms } => write!(
                f,
                "Session started; automatic shutdown in {} min",
                shutdown_in_ms / 60_000
            ),
            Self::SessionStopping => write!(f, "Shutting down; the bubbles stop shortly"),
            Self::SessionStopped => write!(f, "Tub switched off"),
            Self::TargetSet { target_c } => write!(f, "Target set to {target_c:.1}°C"),
            Self::CleaningStarted { shutdown_in_ms } => write!(
                f,
                "Filter cleaning started; automatic stop in {} s",
                shutdown_in_ms / 1_000
            ),
            Self::CleaningStopped => write!(f, "Filter cleaning stopped"),
            Self::Unlocked => write!(f, "Tub unlocked for residents"),
            Self::Locked => write!(f, "Tub locked"),
            Self::Unavailable => write!(f, "Tub is locked or has not enough water"),
            Self::AdminOnly => write!(f, "Only administrators can run this command"),
        }
    }
}

#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    view: PlantView,
    bubbles_shutdown_at_ms: Option<u64>,
}

impl Supervisor {
    pub fn new(mut config: SupervisorConfig) -> Self {
        config.sanitize();
        Self {
            config,
            view: PlantView::default(),
            bubbles_shutdown_at_ms: None,
        }
    }

    pub fn view(&self) -> &PlantView {
        &self.view
    }

    pub fn shutdown_deadline_ms(&self) -> Option<u64> {
        self.bubbles_shutdown_at_ms
    }

    /// Mirror a value the tub received on its desired channel.
    pub fn observe_desired(&mut self, path: &str, payload: &str) {
        if let Err(err) = self.view.desired.apply(path, payload) {
            warn!("supervisor ignored desired update: {err}");
        }
    }

    /// Mirror a value the tub reported on its state channel.
    pub fn observe_state(&mut self, path: &str, payload: &str) {
        self.view.observe_state(path, payload);
    }

    /// Apply the safety and timer policy. Runs whenever the tub reports its
    /// clock, so it follows the tub's telemetry cadence.
    pub fn check(&mut self, now_ms: u64) -> Vec<RemoteUpdate> {
        let mut writes = Vec::new();

        if let Some(temperature_c) = self.view.temperature_c {
            if temperature_c >= self.config.emergency_temp_c && self.view.running() {
                error!("emergency shutdown at {temperature_c:.2}°C");
                self.write(&mut writes, PATH_HEATER, false);
                self.write(&mut writes, PATH_BUBBLES, false);
            }
        }

        if !self.view.desired.bubbles_requested {
            self.bubbles_shutdown_at_ms = None;
            return writes;
        }

        match self.bubbles_shutdown_at_ms {
            Some(deadline) if deadline <= now_ms => {
                if self.view.desired.heater_requested {
                    info!("auto shutdown: heater off, bubbles run on");
                    self.write(&mut writes, PATH_HEATER, false);
                    self.bubbles_shutdown_at_ms =
                        Some(now_ms.saturating_add(self.config.bubbles_rundown_ms));
                } else {
                    info!("auto shutdown: bubbles off");
                    self.write(&mut writes, PATH_BUBBLES, false);
                    self.write(&mut writes, PATH_CLEAN, false);
                    self.bubbles_shutdown_at_ms = None;
                }
            }
            _ => {}
        }

        writes
    }

    pub fn handle(
        &mut self,
        command: OperatorCommand,
        admin: bool,
        now_ms: u64,
    ) -> (OperatorReply, Vec<RemoteUpdate>) {
        let mut writes = Vec::new();

        if command.requires_admin() && !admin {
            return (OperatorReply::AdminOnly, writes);
        }

        let reply = match command {
            OperatorCommand::ToggleSession if !self.view.available() => OperatorReply::Unavailable,
            OperatorCommand::ToggleSession if self.view.running() => {
                let desired = self.view.desired;
                if desired.heater_requested && !desired.bubbles_requested {
                    self.write(&mut writes, PATH_HEATER, false);
                }
                if desired.bubbles_requested {
                    // The next check starts the staged shutdown.
                    self.bubbles_shutdown_at_ms = Some(now_ms);
                    OperatorReply::SessionStopping
                } else {
                    OperatorReply::SessionStopped
                }
            }
            OperatorCommand::ToggleSession => {
                self.write(&mut writes, PATH_BUBBLES, true);
                self.write(&mut writes, PATH_HEATER, true);
                let shutdown_in_ms = self.config.session_timeout_ms;
                self.bubbles_shutdown_at_ms = Some(now_ms.saturating_add(shutdown_in_ms));
                OperatorReply::SessionStarted { shutdown_in_ms }
            }
            OperatorCommand::SetTarget(_) if !self.view.available() => OperatorReply::Unavailable,
            OperatorCommand::SetTarget(requested) => {
                let target_c = self.clamp_target(requested);
                writes.push(RemoteUpdate::new(PATH_TEMP_TARGET, target_c.to_string()));
                self.view.desired.target_temperature_c = target_c;
                if !self.view.desired.heater_requested {
                    self.write(&mut writes, PATH_HEATER, true);
                }
                OperatorReply::TargetSet { target_c }
            }
            OperatorCommand::ToggleCleaning => {
                let cleaning = !self.view.desired.cleaning;
                self.write(&mut writes, PATH_CLEAN, cleaning);
                self.write(&mut writes, PATH_BUBBLES, cleaning);
                self.write(&mut writes, PATH_HEATER, false);
                if cleaning {
                    let shutdown_in_ms = self.config.cleaning_timeout_ms;
                    self.bubbles_shutdown_at_ms = Some(now_ms.saturating_add(shutdown_in_ms));
                    OperatorReply::CleaningStarted { shutdown_in_ms }
                } else {
                    self.bubbles_shutdown_at_ms = None;
                    OperatorReply::CleaningStopped
                }
            }
            OperatorCommand::ToggleLock => {
                let active = !self.view.desired.active;
                self.write(&mut writes, PATH_ACTIVE, active);
                self.write(&mut writes, PATH_BUBBLES, false);
                self.write(&mut writes, PATH_HEATER, false);
                self.bubbles_shutdown_at_ms = None;
                if active {
                    OperatorReply::Unlocked
                } else {
                    OperatorReply::Locked
                }
            }
        };

        info!("operator {command:?}: {reply}");
        (reply, writes)
    }

    fn clamp_target(&self, requested: Option<f32>) -> f32 {
        requested
            .filter(|target| target.is_finite())
            .unwrap_or(self.config.max_target_c)
            .clamp(self.config.min_target_c, self.config.max_target_c)
    }

    fn write(&mut self, writes: &mut Vec<RemoteUpdate>, path: &str, value: bool) {
        let payload = if value { "true" } else { "false" };
        if let Err(err) = self.view.desired.apply(path, payload) {
            warn!("supervisor produced an invalid write: {err}");
            return;
        }
        writes.push(RemoteUpdate::new(path, payload));
    }
}
