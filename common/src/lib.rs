pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod permissions;
pub mod ports;
pub mod supervisor;
pub mod topics;
pub mod types;

pub use config::{NetworkConfig, RuntimeConfig, SupervisorConfig, TubConfig};
pub use control::{ControlLoop, TickReport, PROBE_DISCONNECTED_MESSAGE};
pub use error::{CommandError, SyncError};
pub use permissions::{evaluate, is_probe_disconnected};
pub use ports::{ActuatorGateway, RemoteStateSync, SensorGateway};
pub use supervisor::{OperatorCommand, OperatorReply, PlantView, Supervisor};
pub use topics::*;
pub use types::{
    DerivedPermissions, DesiredState, RemoteUpdate, SensedState, TelemetryValue, TubStatus,
    DISCONNECT_SENTINEL_C,
};
