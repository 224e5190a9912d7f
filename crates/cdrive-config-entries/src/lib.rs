//! Config Entries
//!
//! Persisted configuration records for integration instances, and the
//! machinery that drives them through setup and unload.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - one configured instance (e.g. one vendor account)
//! - [`ConfigEntryState`] - lifecycle state, with validated transitions
//! - [`ConfigEntries`] - manager: storage, indexes, setup/unload, retries
//! - [`EntryHandler`] - implemented by integrations to set entries up
//! - [`FlowManager`] / [`ConfigFlowHandler`] - interactive entry creation
//!
//! # Storage
//!
//! Entries are persisted in `.storage/core.config_entries` as a versioned
//! JSON document.

pub mod entry;
pub mod flow;
pub mod manager;
pub mod state_machine;
pub mod storage;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState};
pub use flow::{
    ConfigFlowHandler, FlowContext, FlowError, FlowManager, FlowResult, FormField, StepResult,
};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, EntryHandler,
    SetupError, STORAGE_KEY, STORAGE_VERSION,
};
pub use state_machine::{retry_delay, InvalidTransition};
pub use storage::{Storage, StorageError, StorageFile, StorageResult};
