//! Seams to the vendor client
//!
//! Every method here performs blocking network I/O and must only be called
//! from the blocking executor.

use std::sync::Arc;
use thiserror::Error;

use crate::config::AccountConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VehicleError {
    /// Network unreachable, DNS failure, connection reset
    #[error("could not connect to the ConnectedDrive portal: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("portal returned an error: {0}")]
    Api(String),

    #[error("{0}")]
    Other(String),
}

impl VehicleError {
    /// I/O class failures, which periodic refreshes tolerate
    pub fn is_transport(&self) -> bool {
        matches!(self, VehicleError::Connection(_))
    }
}

/// Remote commands a vehicle accepts
pub trait RemoteServices: Send + Sync {
    fn trigger_remote_light_flash(&self) -> Result<(), VehicleError>;

    fn trigger_remote_horn(&self) -> Result<(), VehicleError>;

    fn trigger_remote_air_conditioning(&self) -> Result<(), VehicleError>;
}

pub trait Vehicle: Send + Sync {
    fn vin(&self) -> &str;

    fn name(&self) -> &str;

    fn remote_services(&self) -> &dyn RemoteServices;
}

/// An authenticated session for one account
pub trait ConnectedDriveSession: Send {
    /// Fetch the current state of every vehicle on the account
    fn update_vehicle_states(&mut self) -> Result<(), VehicleError>;

    /// Vehicles known after the last state update
    fn vehicles(&self) -> Vec<Arc<dyn Vehicle>>;
}

/// Opens sessions from account credentials
pub trait SessionFactory: Send + Sync {
    fn create(&self, config: &AccountConfig)
        -> Result<Box<dyn ConnectedDriveSession>, VehicleError>;
}
