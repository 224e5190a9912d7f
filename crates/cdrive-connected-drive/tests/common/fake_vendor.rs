//! In-memory stand-in for the ConnectedDrive portal

use cdrive_connected_drive::{
    AccountConfig, ConnectedDriveSession, RemoteServices, SessionFactory, Vehicle, VehicleError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every remote command it receives
#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<Vec<&'static str>>,
}

impl FakeRemote {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str) -> Result<(), VehicleError> {
        self.calls.lock().unwrap().push(method);
        Ok(())
    }
}

impl RemoteServices for FakeRemote {
    fn trigger_remote_light_flash(&self) -> Result<(), VehicleError> {
        self.record("trigger_remote_light_flash")
    }

    fn trigger_remote_horn(&self) -> Result<(), VehicleError> {
        self.record("trigger_remote_horn")
    }

    fn trigger_remote_air_conditioning(&self) -> Result<(), VehicleError> {
        self.record("trigger_remote_air_conditioning")
    }
}

pub struct FakeVehicle {
    pub vin: String,
    pub remote: FakeRemote,
}

impl Vehicle for FakeVehicle {
    fn vin(&self) -> &str {
        &self.vin
    }

    fn name(&self) -> &str {
        "Test car"
    }

    fn remote_services(&self) -> &dyn RemoteServices {
        &self.remote
    }
}

/// Portal state shared by the factory and all sessions it created
#[derive(Default)]
pub struct FakePortal {
    /// username -> vehicles
    garages: Mutex<HashMap<String, Vec<Arc<FakeVehicle>>>>,
    /// Returned by every state update while set
    failure: Mutex<Option<VehicleError>>,
    /// Returned by session creation while set
    login_failure: Mutex<Option<VehicleError>>,
    pub sessions: AtomicUsize,
    pub refreshes: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub portal: Arc<FakePortal>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vehicle(&self, username: &str, vin: &str) -> Arc<FakeVehicle> {
        let vehicle = Arc::new(FakeVehicle {
            vin: vin.to_string(),
            remote: FakeRemote::default(),
        });
        self.portal
            .garages
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .push(vehicle.clone());
        vehicle
    }

    /// Make every following state update fail (or succeed again with `None`)
    pub fn fail_updates(&self, error: Option<VehicleError>) {
        *self.portal.failure.lock().unwrap() = error;
    }

    pub fn fail_logins(&self, error: Option<VehicleError>) {
        *self.portal.login_failure.lock().unwrap() = error;
    }

    pub fn sessions(&self) -> usize {
        self.portal.sessions.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.portal.refreshes.load(Ordering::SeqCst)
    }
}

impl SessionFactory for FakeFactory {
    fn create(
        &self,
        config: &AccountConfig,
    ) -> Result<Box<dyn ConnectedDriveSession>, VehicleError> {
        if let Some(error) = self.portal.login_failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.portal.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            username: config.username.clone(),
            portal: self.portal.clone(),
        }))
    }
}

struct FakeSession {
    username: String,
    portal: Arc<FakePortal>,
}

impl ConnectedDriveSession for FakeSession {
    fn update_vehicle_states(&mut self) -> Result<(), VehicleError> {
        self.portal.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.portal.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn vehicles(&self) -> Vec<Arc<dyn Vehicle>> {
        self.portal
            .garages
            .lock()
            .unwrap()
            .get(&self.username)
            .map(|cars| {
                cars.iter()
                    .map(|car| car.clone() as Arc<dyn Vehicle>)
                    .collect()
            })
            .unwrap_or_default()
    }
}
