//! Entity platforms the integration forwards its entries to

use async_trait::async_trait;
use cdrive_config_entries::ConfigEntry;
use std::fmt;
use std::sync::Arc;

use crate::account::ConnectedDriveAccount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    BinarySensor,
    DeviceTracker,
    Lock,
    Notify,
    Sensor,
}

impl Platform {
    /// Every platform an entry is forwarded to, in start order
    pub const ALL: [Platform; 5] = [
        Platform::BinarySensor,
        Platform::DeviceTracker,
        Platform::Lock,
        Platform::Notify,
        Platform::Sensor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::BinarySensor => "binary_sensor",
            Platform::DeviceTracker => "device_tracker",
            Platform::Lock => "lock",
            Platform::Notify => "notify",
            Platform::Sensor => "sensor",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host side of entity platforms
///
/// Platforms subscribe to the account's update listeners during setup.
#[async_trait]
pub trait PlatformForwarder: Send + Sync {
    /// Start `platform` for the entry; returns whether it started
    async fn setup_platform(
        &self,
        entry: &ConfigEntry,
        platform: Platform,
        account: Arc<ConnectedDriveAccount>,
    ) -> bool;

    /// Stop `platform` for the entry; returns whether it stopped cleanly
    async fn unload_platform(&self, entry: &ConfigEntry, platform: Platform) -> bool;
}
