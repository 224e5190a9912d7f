//! Config Entry types

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state_machine::InvalidTransition;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Not set up yet, or cleanly unloaded
    #[default]
    NotLoaded,
    /// Integration setup is running
    SetupInProgress,
    /// Set up and running
    Loaded,
    /// Setup failed permanently (until reconfigured)
    SetupError,
    /// Setup reported "not ready"; a retry is scheduled
    SetupRetry,
    /// Stored data could not be migrated
    MigrationError,
    /// Integration unload is running
    UnloadInProgress,
    /// Unload reported failure; the integration may still hold resources
    FailedUnload,
}

impl ConfigEntryState {
    /// States from which an unload may be attempted
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::NotLoaded
                | ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
        )
    }
}

/// How an entry came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Created through the interactive flow
    #[default]
    User,
    /// Imported from `configuration.yaml`
    Import,
    /// Re-authentication of an existing entry
    Reauth,
}

/// A configuration entry for one integration instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g. "bmw_connected_drive")
    pub domain: String,

    /// Display name
    pub title: String,

    /// Integration-owned configuration data
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    #[serde(default = "default_version")]
    pub version: u32,

    /// Identity used to reject duplicate configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Whether the user disabled this entry
    #[serde(default)]
    pub disabled: bool,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Explanation for failed states (not persisted)
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// Consecutive "not ready" setup attempts (not persisted)
    #[serde(skip, default)]
    pub tries: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            disabled: false,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            tries: 0,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    /// Deserialize the entry data into an integration's typed config
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let map: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map))
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Move to `new_state` if the transition is allowed
    ///
    /// The retry counter survives only while the entry cycles between
    /// `SetupRetry` and `SetupInProgress`.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state = self.state.try_transition(new_state)?;
        self.reason = reason;

        if !matches!(
            new_state,
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress
        ) {
            self.tries = 0;
        }
        Ok(())
    }
}
