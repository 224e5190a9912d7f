//! Config Entries Manager
//!
//! Owns every config entry, persists them, and drives them through the
//! lifecycle by calling the owning integration's [`EntryHandler`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState};
use crate::state_machine::{retry_delay, InvalidTransition};
use crate::storage::{Storage, StorageError, StorageFile};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("setup not ready, retry scheduled: {0}")]
    NotReady(String),

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("unload failed for entry {0}")]
    UnloadFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Outcome of an integration's setup attempt that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// Transient failure; the manager retries with backoff
    #[error("not ready: {0}")]
    NotReady(String),

    /// Permanent failure; the entry stays in `SetupError`
    #[error("{0}")]
    Failed(String),
}

/// Implemented by integrations to bring their entries up and down
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError>;

    /// Returns false when some part of the teardown failed
    async fn unload_entry(&self, entry: &ConfigEntry) -> bool;
}

/// On-disk shape of the entries file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

/// Config Entries Manager
pub struct ConfigEntries {
    storage: Storage,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup and unload across all entries
    setup_lock: Mutex<()>,

    handlers: DashMap<String, Arc<dyn EntryHandler>>,

    /// Scheduled setup retries by entry_id
    pending_retries: DashMap<String, JoinHandle<()>>,
}

impl ConfigEntries {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            handlers: DashMap::new(),
            pending_retries: DashMap::new(),
        }
    }

    /// Load persisted entries
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(file) = self
            .storage
            .load::<ConfigEntriesData>(STORAGE_KEY, STORAGE_VERSION)
            .await?
        {
            info!("Loading {} config entries from storage", file.data.entries.len());
            for entry in file.data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> ConfigEntriesResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage
            .save(&StorageFile::new(STORAGE_KEY, data, STORAGE_VERSION))
            .await?;
        debug!("Saved {} config entries", self.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        self.entries.insert(entry.entry_id.clone(), entry.clone());
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry.entry_id.clone());
        if let Some(unique_id) = &entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(unique_id) = &entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Entries of a domain, oldest first
    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        entries
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add and persist a new entry, rejecting duplicate unique ids
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(unique_id) = &entry.unique_id {
            // Claim the unique id before anything else is indexed
            match self
                .by_unique_id
                .entry((entry.domain.clone(), unique_id.clone()))
            {
                Entry::Occupied(_) => {
                    return Err(ConfigEntriesError::AlreadyExists {
                        domain: entry.domain.clone(),
                        unique_id: unique_id.clone(),
                    })
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry.entry_id.clone());
                }
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Unload (if needed) and delete an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state.can_transition_to(ConfigEntryState::UnloadInProgress) {
            self.unload(entry_id).await?;
        }
        self.cancel_retry(entry_id);

        self.unindex_entry(&entry);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    pub fn register_handler(&self, domain: &str, handler: Arc<dyn EntryHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered entry handler for domain: {}", domain);
    }

    fn handler(&self, domain: &str) -> Option<Arc<dyn EntryHandler>> {
        self.handlers.get(domain).map(|h| h.value().clone())
    }

    /// Validated state change; returns the updated entry
    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(entry.clone())
    }

    /// Set an entry up through its domain's handler
    ///
    /// A "not ready" result moves the entry to `SetupRetry` and schedules
    /// another attempt with exponential backoff.
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.disabled {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }

        let entry = self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(handler) = self.handler(&entry.domain) else {
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No entry handler for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        match handler.setup_entry(&entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                let tries = self
                    .entries
                    .get_mut(entry_id)
                    .map(|mut e| {
                        e.tries += 1;
                        e.tries
                    })
                    .unwrap_or(1);
                let delay = retry_delay(tries - 1);
                warn!(
                    entry_id,
                    tries,
                    ?delay,
                    "Setup of {} not ready, retrying: {}",
                    entry.title,
                    reason
                );
                self.schedule_retry(entry_id.to_string(), delay);
                Err(ConfigEntriesError::NotReady(reason))
            }
            Err(SetupError::Failed(reason)) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: String, delay: Duration) {
        let manager = Arc::clone(self);
        let id = entry_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.pending_retries.remove(&id);
            if let Err(e) = manager.setup(&id).await {
                debug!(entry_id = %id, "Retried setup did not complete: {}", e);
            }
        });

        if let Some(previous) = self.pending_retries.insert(entry_id, handle) {
            previous.abort();
        }
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, handle)) = self.pending_retries.remove(entry_id) {
            handle.abort();
            debug!("Cancelled pending setup retry for {}", entry_id);
        }
    }

    /// Whether a setup retry is scheduled for the entry
    pub fn has_pending_retry(&self, entry_id: &str) -> bool {
        self.pending_retries.contains_key(entry_id)
    }

    /// Unload an entry through its domain's handler
    ///
    /// Entries that never finished setup are unloaded without calling the
    /// handler. A handler reporting failure leaves the entry in
    /// `FailedUnload`, from where the unload can be attempted again.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.cancel_retry(entry_id);

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(()),
            state if !state.can_transition_to(ConfigEntryState::UnloadInProgress) => {
                return Err(ConfigEntriesError::CannotUnload(state))
            }
            _ => {}
        }

        let was_loaded = matches!(
            entry.state,
            ConfigEntryState::Loaded | ConfigEntryState::FailedUnload
        );
        let entry = self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let unloaded = match self.handler(&entry.domain) {
            Some(handler) if was_loaded => handler.unload_entry(&entry).await,
            _ => true,
        };

        if unloaded {
            self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
            info!("Unloaded entry: {} ({})", entry.title, entry_id);
            Ok(())
        } else {
            warn!("Unload failed for entry: {} ({})", entry.title, entry_id);
            self.transition(
                entry_id,
                ConfigEntryState::FailedUnload,
                Some("integration reported unload failure".to_string()),
            )?;
            Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()))
        }
    }

    /// Set up every entry, oldest first within each domain
    pub async fn setup_all(self: &Arc<Self>) -> Vec<ConfigEntriesResult<()>> {
        let mut domains = self.domains();
        domains.sort();

        let mut results = Vec::new();
        for domain in domains {
            for entry in self.get_by_domain(&domain) {
                results.push(self.setup(&entry.entry_id).await);
            }
        }
        results
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn domains(&self) -> Vec<String> {
        self.by_domain
            .iter()
            .filter(|r| !r.value().is_empty())
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
