//! BMW ConnectedDrive integration
//!
//! Polls ConnectedDrive accounts for vehicle state and exposes remote
//! commands as services.
//!
//! # Key Types
//!
//! - [`ConnectedDrive`] - entry handler: per-entry account, timer, platforms
//! - [`ConnectedDriveAccount`] - session wrapper with update listeners
//! - [`ServiceDispatcher`] - `light_flash`, `sound_horn`,
//!   `activate_air_conditioning` and `update_state`
//! - [`UpdateSchedule`] / [`UpdateTimer`] - five-minute polling cadence
//! - [`ConnectedDriveFlow`] - credential validation and entry creation
//!
//! The vendor client is reached through [`SessionFactory`],
//! [`ConnectedDriveSession`], [`Vehicle`] and [`RemoteServices`]; entity
//! platforms through [`PlatformForwarder`].

pub mod account;
pub mod config;
pub mod config_flow;
pub mod executor;
pub mod integration;
pub mod listeners;
pub mod platform;
pub mod region;
pub mod schedule;
pub mod services;
pub mod vehicle;

use thiserror::Error;

pub use account::{AccountRegistry, ConnectedDriveAccount, VehicleSnapshot};
pub use config::{accounts_from_yaml, AccountConfig, AccountsSection};
pub use config_flow::ConnectedDriveFlow;
pub use executor::{Executor, ExecutorError, DEFAULT_EXECUTOR_LIMIT};
pub use integration::{setup_from_config, ConnectedDrive};
pub use listeners::{ListenerRegistry, UpdateListener};
pub use platform::{Platform, PlatformForwarder};
pub use region::{Region, UnknownRegion};
pub use schedule::{Clock, SystemClock, UpdateSchedule, UpdateTimer};
pub use services::{vin_schema, RemoteAction, ServiceDispatcher};
pub use vehicle::{ConnectedDriveSession, RemoteServices, SessionFactory, Vehicle, VehicleError};

pub const DOMAIN: &str = "bmw_connected_drive";

pub const CONF_USERNAME: &str = "username";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_REGION: &str = "region";
pub const CONF_READ_ONLY: &str = "read_only";

pub const ATTR_VIN: &str = "vin";

pub const SERVICE_UPDATE_STATE: &str = "update_state";

/// Minutes between scheduled refreshes of an account
pub const UPDATE_INTERVAL_MINUTES: u32 = 5;

#[derive(Debug, Error)]
pub enum ConnectedDriveError {
    #[error("invalid configuration: {0}")]
    Config(#[from] cdrive_config::ConfigError),

    #[error(transparent)]
    Flow(#[from] cdrive_config_entries::FlowError),
}
