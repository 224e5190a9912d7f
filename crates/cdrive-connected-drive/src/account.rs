//! ConnectedDrive accounts and the live account registry

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, warn};

use crate::config::AccountConfig;
use crate::listeners::{ListenerRegistry, UpdateListener};
use crate::vehicle::{ConnectedDriveSession, SessionFactory, Vehicle, VehicleError};

/// Vehicles as of the last successful refresh
#[derive(Clone, Default)]
pub struct VehicleSnapshot {
    pub vehicles: Vec<Arc<dyn Vehicle>>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl VehicleSnapshot {
    pub fn get(&self, vin: &str) -> Option<Arc<dyn Vehicle>> {
        self.vehicles.iter().find(|v| v.vin() == vin).cloned()
    }
}

/// One vendor account: its session, cached vehicle states and listeners
///
/// All methods that touch the session block and belong on the executor.
pub struct ConnectedDriveAccount {
    name: String,
    config: AccountConfig,
    /// Held for the whole refresh so refreshes of one account never overlap
    session: Mutex<Box<dyn ConnectedDriveSession>>,
    snapshot: RwLock<Arc<VehicleSnapshot>>,
    listeners: ListenerRegistry,
}

impl ConnectedDriveAccount {
    pub fn new(
        name: impl Into<String>,
        config: AccountConfig,
        session: Box<dyn ConnectedDriveSession>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            session: Mutex::new(session),
            snapshot: RwLock::new(Arc::new(VehicleSnapshot::default())),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Open a session through `factory`
    pub fn connect(
        name: impl Into<String>,
        config: AccountConfig,
        factory: &dyn SessionFactory,
    ) -> Result<Self, VehicleError> {
        let name = name.into();
        debug!(account = %name, region = %config.region, "Adding new account");
        let session = factory.create(&config)?;
        Ok(Self::new(name, config, session))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn read_only(&self) -> bool {
        self.config.read_only
    }

    /// Refresh vehicle states and notify listeners
    ///
    /// Every failure is returned; on failure the snapshot is unchanged and
    /// no listener runs. On success returns how many listeners panicked.
    pub fn refresh(&self) -> Result<usize, VehicleError> {
        debug!(
            account = %self.name,
            listeners = self.listeners.len(),
            "Updating vehicle state"
        );

        // Held until the listeners are done so snapshots are published in order
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.update_vehicle_states()?;

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(VehicleSnapshot {
            vehicles: session.vehicles(),
            fetched_at: Some(Utc::now()),
        });

        Ok(self.listeners.notify_all())
    }

    /// Periodic refresh: portal connectivity failures are logged and dropped
    pub fn update(&self) -> Result<(), VehicleError> {
        match self.refresh() {
            Ok(_) => Ok(()),
            Err(e) if e.is_transport() => {
                error!(
                    account = %self.name,
                    error = %e,
                    "Vehicle state not updated, portal unreachable"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn snapshot(&self) -> Arc<VehicleSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_vehicle(&self, vin: &str) -> Option<Arc<dyn Vehicle>> {
        self.snapshot().get(vin)
    }

    pub fn vehicles(&self) -> Vec<Arc<dyn Vehicle>> {
        self.snapshot().vehicles.clone()
    }

    pub fn add_update_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener) as UpdateListener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Live accounts keyed by config entry id, in setup order
#[derive(Default)]
pub struct AccountRegistry {
    accounts: RwLock<IndexMap<String, Arc<ConnectedDriveAccount>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry_id: impl Into<String>, account: Arc<ConnectedDriveAccount>) {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry_id.into(), account);
    }

    pub fn remove(&self, entry_id: &str) -> Option<Arc<ConnectedDriveAccount>> {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(entry_id)
    }

    pub fn get(&self, entry_id: &str) -> Option<Arc<ConnectedDriveAccount>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entry_id)
            .cloned()
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.get(entry_id).is_some()
    }

    /// All accounts in setup order
    pub fn all(&self) -> Vec<Arc<ConnectedDriveAccount>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find a vehicle among read-write accounts
    ///
    /// When several accounts hold the VIN, the one set up last wins.
    pub fn find_remote_vehicle(&self, vin: &str) -> Option<Arc<dyn Vehicle>> {
        let matches: Vec<(String, Arc<dyn Vehicle>)> = self
            .all()
            .into_iter()
            .filter(|account| !account.read_only())
            .filter_map(|account| {
                account
                    .get_vehicle(vin)
                    .map(|vehicle| (account.name().to_string(), vehicle))
            })
            .collect();

        if matches.len() > 1 {
            let accounts: Vec<&str> = matches.iter().map(|(name, _)| name.as_str()).collect();
            warn!(
                vin,
                ?accounts,
                "VIN is registered in several accounts, using the last one"
            );
        }
        matches.into_iter().last().map(|(_, vehicle)| vehicle)
    }
}
