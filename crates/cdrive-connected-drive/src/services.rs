//! Remote services
//!
//! `light_flash`, `sound_horn` and `activate_air_conditioning` forward to a
//! vehicle's remote services; `update_state` refreshes every account. The
//! dispatcher registers the commands while at least one entry needs them.

use cdrive_services::{ServiceCall, ServiceDescription, ServiceError, ServiceResult, SharedServiceRegistry};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::account::AccountRegistry;
use crate::executor::Executor;
use crate::vehicle::{RemoteServices, VehicleError};
use crate::{ATTR_VIN, DOMAIN, SERVICE_UPDATE_STATE};

/// A remote command sent to one vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteAction {
    LightFlash,
    SoundHorn,
    ActivateAirConditioning,
}

impl RemoteAction {
    pub const ALL: [RemoteAction; 3] = [
        RemoteAction::LightFlash,
        RemoteAction::SoundHorn,
        RemoteAction::ActivateAirConditioning,
    ];

    pub fn service(&self) -> &'static str {
        match self {
            RemoteAction::LightFlash => "light_flash",
            RemoteAction::SoundHorn => "sound_horn",
            RemoteAction::ActivateAirConditioning => "activate_air_conditioning",
        }
    }

    pub fn from_service(service: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.service() == service)
    }

    /// Name of the vendor method the command maps to
    pub fn method_name(&self) -> &'static str {
        match self {
            RemoteAction::LightFlash => "trigger_remote_light_flash",
            RemoteAction::SoundHorn => "trigger_remote_horn",
            RemoteAction::ActivateAirConditioning => "trigger_remote_air_conditioning",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            RemoteAction::LightFlash => "Flash the lights of the vehicle",
            RemoteAction::SoundHorn => "Sound the horn of the vehicle",
            RemoteAction::ActivateAirConditioning => "Start the climate control of the vehicle",
        }
    }

    /// Blocking
    pub fn invoke(&self, remote: &dyn RemoteServices) -> Result<(), VehicleError> {
        match self {
            RemoteAction::LightFlash => remote.trigger_remote_light_flash(),
            RemoteAction::SoundHorn => remote.trigger_remote_horn(),
            RemoteAction::ActivateAirConditioning => remote.trigger_remote_air_conditioning(),
        }
    }
}

/// Call data schema for remote commands
pub fn vin_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            ATTR_VIN: { "type": "string" }
        },
        "required": [ATTR_VIN]
    })
}

#[derive(Default)]
struct Holders {
    all: HashSet<String>,
    read_write: HashSet<String>,
}

/// Owns the integration's service registrations
///
/// Entries acquire the dispatcher at setup and release it at unload. The
/// remote commands exist while a read-write entry holds it; `update_state`
/// exists while any entry does.
pub struct ServiceDispatcher {
    registry: SharedServiceRegistry,
    accounts: Arc<AccountRegistry>,
    executor: Executor,
    holders: Mutex<Holders>,
}

impl ServiceDispatcher {
    pub fn new(
        registry: SharedServiceRegistry,
        accounts: Arc<AccountRegistry>,
        executor: Executor,
    ) -> Self {
        Self {
            registry,
            accounts,
            executor,
            holders: Mutex::new(Holders::default()),
        }
    }

    pub fn acquire(&self, entry_id: &str, read_only: bool) -> Result<(), ServiceError> {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);

        if holders.all.is_empty() {
            self.register_update_state()?;
        }
        holders.all.insert(entry_id.to_string());

        if !read_only {
            if holders.read_write.is_empty() {
                if let Err(e) = self.register_remote_services() {
                    holders.all.remove(entry_id);
                    if holders.all.is_empty() {
                        self.registry.unregister(DOMAIN, SERVICE_UPDATE_STATE);
                    }
                    return Err(e);
                }
            }
            holders.read_write.insert(entry_id.to_string());
        }

        debug!(
            entry_id,
            holders = holders.all.len(),
            read_write = holders.read_write.len(),
            "Acquired service dispatcher"
        );
        Ok(())
    }

    /// Release an entry's hold; idempotent
    ///
    /// Returns false if a service that should have been removed was not
    /// registered.
    pub fn release(&self, entry_id: &str) -> bool {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed_all = true;

        if holders.read_write.remove(entry_id) && holders.read_write.is_empty() {
            for action in RemoteAction::ALL {
                removed_all &= self.registry.unregister(DOMAIN, action.service());
            }
            info!("Removed remote services, no read-write account left");
        }

        if holders.all.remove(entry_id) && holders.all.is_empty() {
            removed_all &= self.registry.unregister(DOMAIN, SERVICE_UPDATE_STATE);
            info!("Removed {} service, no account left", SERVICE_UPDATE_STATE);
        }

        if !removed_all {
            warn!(entry_id, "Some services were already gone on release");
        }
        removed_all
    }

    pub fn holder_count(&self) -> usize {
        self.holders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .all
            .len()
    }

    fn register_remote_services(&self) -> Result<(), ServiceError> {
        for action in RemoteAction::ALL {
            let accounts = self.accounts.clone();
            let executor = self.executor.clone();
            self.registry.register(
                ServiceDescription::new(DOMAIN, action.service())
                    .with_description(action.description())
                    .with_schema(vin_schema()),
                move |call: ServiceCall| {
                    let accounts = accounts.clone();
                    let executor = executor.clone();
                    async move { execute_remote(action, &accounts, &executor, &call).await }
                },
            )?;
        }
        Ok(())
    }

    fn register_update_state(&self) -> Result<(), ServiceError> {
        let accounts = self.accounts.clone();
        let executor = self.executor.clone();
        self.registry.register(
            ServiceDescription::new(DOMAIN, SERVICE_UPDATE_STATE)
                .with_description("Fetch the latest state of all vehicles"),
            move |_call: ServiceCall| {
                let accounts = accounts.clone();
                let executor = executor.clone();
                async move { update_all(&accounts, &executor).await }
            },
        )
    }
}

async fn execute_remote(
    action: RemoteAction,
    accounts: &AccountRegistry,
    executor: &Executor,
    call: &ServiceCall,
) -> ServiceResult {
    let vin = call
        .get_str(ATTR_VIN)
        .ok_or_else(|| ServiceError::InvalidData(format!("{} is required", ATTR_VIN)))?
        .to_string();

    let Some(vehicle) = accounts.find_remote_vehicle(&vin) else {
        error!(vin = %vin, "Could not find a vehicle for VIN");
        return Ok(None);
    };

    debug!(vin = %vin, method = action.method_name(), "Executing remote service");
    executor
        .run(move || action.invoke(vehicle.remote_services()))
        .await
        .map_err(|e| ServiceError::CallFailed(e.to_string()))?
        .map_err(|e| ServiceError::CallFailed(e.to_string()))?;
    Ok(None)
}

async fn update_all(accounts: &AccountRegistry, executor: &Executor) -> ServiceResult {
    for account in accounts.all() {
        let name = account.name().to_string();
        executor
            .run(move || account.update())
            .await
            .map_err(|e| ServiceError::CallFailed(e.to_string()))?
            .map_err(|e| {
                warn!(account = %name, "Update failed: {}", e);
                ServiceError::CallFailed(e.to_string())
            })?;
    }
    Ok(None)
}
