//! Recording platform forwarder

use async_trait::async_trait;
use cdrive_config_entries::ConfigEntry;
use cdrive_connected_drive::{ConnectedDriveAccount, Platform, PlatformForwarder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records platform starts and stops; each started platform subscribes one
/// update listener that counts notifications
#[derive(Default)]
pub struct RecordingForwarder {
    setups: Mutex<Vec<(String, Platform)>>,
    unloads: Mutex<Vec<(String, Platform)>>,
    failing_unloads: Mutex<HashSet<Platform>>,
    pub notifications: Arc<AtomicUsize>,
}

impl RecordingForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn setups(&self) -> Vec<(String, Platform)> {
        self.setups.lock().unwrap().clone()
    }

    pub fn unloads(&self) -> Vec<(String, Platform)> {
        self.unloads.lock().unwrap().clone()
    }

    pub fn fail_unload(&self, platform: Platform, fail: bool) {
        let mut failing = self.failing_unloads.lock().unwrap();
        if fail {
            failing.insert(platform);
        } else {
            failing.remove(&platform);
        }
    }

    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformForwarder for RecordingForwarder {
    async fn setup_platform(
        &self,
        entry: &ConfigEntry,
        platform: Platform,
        account: Arc<ConnectedDriveAccount>,
    ) -> bool {
        let notifications = self.notifications.clone();
        account.add_update_listener(move || {
            notifications.fetch_add(1, Ordering::SeqCst);
        });
        self.setups
            .lock()
            .unwrap()
            .push((entry.entry_id.clone(), platform));
        true
    }

    async fn unload_platform(&self, entry: &ConfigEntry, platform: Platform) -> bool {
        self.unloads
            .lock()
            .unwrap()
            .push((entry.entry_id.clone(), platform));
        !self.failing_unloads.lock().unwrap().contains(&platform)
    }
}
