//! Integration supervisor
//!
//! Brings config entries up and down: one account, one update timer and
//! five platform forwards per entry, plus shared service registrations.

use async_trait::async_trait;
use cdrive_config_entries::{
    ConfigEntry, ConfigEntrySource, EntryHandler, FlowManager, FlowResult, SetupError,
};
use cdrive_services::SharedServiceRegistry;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::account::{AccountRegistry, ConnectedDriveAccount};
use crate::config::{accounts_from_yaml, AccountConfig};
use crate::config_flow::ConnectedDriveFlow;
use crate::executor::Executor;
use crate::platform::{Platform, PlatformForwarder};
use crate::schedule::{Clock, SystemClock, UpdateSchedule, UpdateTimer};
use crate::services::ServiceDispatcher;
use crate::vehicle::{SessionFactory, VehicleError};
use crate::{ConnectedDriveError, DOMAIN};

pub struct ConnectedDrive {
    accounts: Arc<AccountRegistry>,
    dispatcher: ServiceDispatcher,
    factory: Arc<dyn SessionFactory>,
    forwarder: Arc<dyn PlatformForwarder>,
    executor: Executor,
    clock: Arc<dyn Clock>,
    timers: Mutex<HashMap<String, UpdateTimer>>,
    /// Platform starts not yet awaited, per entry
    platform_starts: Mutex<HashMap<String, Vec<JoinHandle<bool>>>>,
}

impl ConnectedDrive {
    pub fn new(
        services: SharedServiceRegistry,
        factory: Arc<dyn SessionFactory>,
        forwarder: Arc<dyn PlatformForwarder>,
    ) -> Self {
        Self::with_runtime(
            services,
            factory,
            forwarder,
            Executor::default(),
            Arc::new(SystemClock),
        )
    }

    pub fn with_runtime(
        services: SharedServiceRegistry,
        factory: Arc<dyn SessionFactory>,
        forwarder: Arc<dyn PlatformForwarder>,
        executor: Executor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let accounts = Arc::new(AccountRegistry::new());
        Self {
            dispatcher: ServiceDispatcher::new(services, accounts.clone(), executor.clone()),
            accounts,
            factory,
            forwarder,
            executor,
            clock,
            timers: Mutex::new(HashMap::new()),
            platform_starts: Mutex::new(HashMap::new()),
        }
    }

    /// Hook the integration into the host's entry manager and flows
    pub fn register(self: &Arc<Self>, flows: &FlowManager) {
        flows.entries().register_handler(DOMAIN, self.clone());
        flows.register(
            DOMAIN,
            Arc::new(ConnectedDriveFlow::new(
                self.factory.clone(),
                self.executor.clone(),
            )),
        );
    }

    pub fn accounts(&self) -> &Arc<AccountRegistry> {
        &self.accounts
    }

    pub fn account(&self, entry_id: &str) -> Option<Arc<ConnectedDriveAccount>> {
        self.accounts.get(entry_id)
    }

    pub fn schedule(&self, entry_id: &str) -> Option<UpdateSchedule> {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entry_id)
            .map(UpdateTimer::schedule)
    }

    fn start_timer(&self, entry_id: &str, account: Arc<ConnectedDriveAccount>) {
        let schedule = UpdateSchedule::from_setup_time(self.clock.now());
        let executor = self.executor.clone();

        let timer = UpdateTimer::start(schedule, self.clock.clone(), move || {
            let account = account.clone();
            let executor = executor.clone();
            async move {
                let name = account.name().to_string();
                match executor.run(move || account.update()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(account = %name, "Scheduled update failed: {}", e),
                    Err(e) => error!(account = %name, "Scheduled update did not run: {}", e),
                }
            }
        });

        debug!(
            entry_id,
            offset_minute = schedule.offset_minute(),
            second = schedule.second(),
            "Scheduled vehicle updates"
        );
        let previous = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry_id.to_string(), timer);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Start every platform without waiting for it
    fn start_platforms(&self, entry: &ConfigEntry, account: Arc<ConnectedDriveAccount>) {
        let handles = Platform::ALL
            .into_iter()
            .map(|platform| {
                let forwarder = self.forwarder.clone();
                let entry = entry.clone();
                let account = account.clone();
                tokio::spawn(async move {
                    let started = forwarder.setup_platform(&entry, platform, account).await;
                    if !started {
                        warn!(entry_id = %entry.entry_id, %platform, "Platform did not start");
                    }
                    started
                })
            })
            .collect();

        self.platform_starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.entry_id.clone(), handles);
    }

    async fn wait_platform_starts(&self, entry_id: &str) {
        let pending = self
            .platform_starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entry_id)
            .unwrap_or_default();

        for result in join_all(pending).await {
            if let Err(e) = result {
                warn!(entry_id, "Platform start task failed: {}", e);
            }
        }
    }

    fn cancel_timer(&self, entry_id: &str) {
        let timer = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entry_id);
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}

#[async_trait]
impl EntryHandler for ConnectedDrive {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
        let config = AccountConfig::from_entry_data(&entry.data)
            .map_err(|e| SetupError::Failed(format!("invalid account data: {}", e)))?;

        let factory = self.factory.clone();
        let name = config.username.clone();
        let account = self
            .executor
            .run(move || -> Result<ConnectedDriveAccount, VehicleError> {
                let account = ConnectedDriveAccount::connect(name, config, factory.as_ref())?;
                account.refresh()?;
                Ok(account)
            })
            .await
            .map_err(|e| SetupError::NotReady(e.to_string()))?
            .map_err(|e| {
                warn!(entry_id = %entry.entry_id, "Initial vehicle update failed: {}", e);
                SetupError::NotReady(e.to_string())
            })?;

        let account = Arc::new(account);
        let read_only = account.read_only();
        self.accounts.insert(entry.entry_id.clone(), account.clone());

        if let Err(e) = self.dispatcher.acquire(&entry.entry_id, read_only) {
            self.accounts.remove(&entry.entry_id);
            return Err(SetupError::Failed(e.to_string()));
        }

        self.start_timer(&entry.entry_id, account.clone());
        self.start_platforms(entry, account);

        info!(
            entry_id = %entry.entry_id,
            read_only,
            "Set up ConnectedDrive account {}",
            entry.title
        );
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> bool {
        let entry_id = entry.entry_id.as_str();
        self.wait_platform_starts(entry_id).await;

        let results = join_all(
            Platform::ALL
                .into_iter()
                .map(|platform| self.forwarder.unload_platform(entry, platform)),
        )
        .await;
        let failed: Vec<Platform> = Platform::ALL
            .into_iter()
            .zip(results)
            .filter_map(|(platform, ok)| (!ok).then_some(platform))
            .collect();
        let services_released = self.dispatcher.release(entry_id);

        if !failed.is_empty() || !services_released {
            warn!(
                entry_id,
                ?failed,
                services_released,
                "Unload incomplete, keeping account"
            );
            return false;
        }

        self.accounts.remove(entry_id);
        self.cancel_timer(entry_id);
        info!(entry_id, "Unloaded ConnectedDrive account {}", entry.title);
        true
    }
}

/// Import every account of the YAML section through the config flow
pub async fn setup_from_config(
    flows: &FlowManager,
    root: &serde_yaml::Value,
) -> Result<Vec<FlowResult>, ConnectedDriveError> {
    let accounts = accounts_from_yaml(root)?;
    let mut results = Vec::with_capacity(accounts.len());

    for (name, config) in accounts {
        debug!(account = %name, "Importing account from configuration");
        let result = flows
            .init(DOMAIN, ConfigEntrySource::Import, Some(config.to_entry_data()))
            .await?;
        results.push(result);
    }
    Ok(results)
}
