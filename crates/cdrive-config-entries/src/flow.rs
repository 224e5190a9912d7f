//! Config flows
//!
//! A flow collects user input step by step until the integration either
//! creates an entry or aborts. Handlers are stateless; the manager keeps
//! track of which flows are waiting on a form.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource};
use crate::manager::{ConfigEntries, ConfigEntriesError};

/// One input of a form step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    /// "string", "password", "boolean" or "select"
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl FormField {
    pub fn required(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required: true,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// What a handler step decided
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    ShowForm {
        step_id: String,
        data_schema: Vec<FormField>,
        /// field name (or "base") -> error key
        errors: HashMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: HashMap<String, Value>,
        unique_id: Option<String>,
    },
    Abort {
        reason: String,
    },
}

impl StepResult {
    pub fn abort(reason: impl Into<String>) -> Self {
        StepResult::Abort {
            reason: reason.into(),
        }
    }
}

/// What the caller of the flow manager sees
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        flow_id: String,
        handler: String,
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
    },
    CreateEntry {
        flow_id: String,
        handler: String,
        title: String,
        entry_id: String,
    },
    Abort {
        flow_id: String,
        handler: String,
        reason: String,
    },
}

impl FlowResult {
    pub fn flow_id(&self) -> &str {
        match self {
            FlowResult::Form { flow_id, .. }
            | FlowResult::CreateEntry { flow_id, .. }
            | FlowResult::Abort { flow_id, .. } => flow_id,
        }
    }
}

/// Read-only view handed to flow steps
pub struct FlowContext<'a> {
    pub source: ConfigEntrySource,
    pub domain: &'a str,
    entries: &'a ConfigEntries,
}

impl<'a> FlowContext<'a> {
    /// Whether an entry of this domain already claims `unique_id`
    pub fn is_configured(&self, unique_id: &str) -> bool {
        self.entries
            .get_by_unique_id(self.domain, unique_id)
            .is_some()
    }

    pub fn existing_entries(&self) -> Vec<ConfigEntry> {
        self.entries.get_by_domain(self.domain)
    }
}

/// Implemented by integrations that can be configured through a flow
#[async_trait]
pub trait ConfigFlowHandler: Send + Sync {
    /// Interactive step; `None` input asks for the initial form
    async fn step_user(
        &self,
        ctx: &FlowContext<'_>,
        input: Option<HashMap<String, Value>>,
    ) -> StepResult;

    /// Import from YAML; treated like a submitted user form by default
    async fn step_import(
        &self,
        ctx: &FlowContext<'_>,
        input: HashMap<String, Value>,
    ) -> StepResult {
        self.step_user(ctx, Some(input)).await
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no config flow registered for domain: {0}")]
    UnknownHandler(String),

    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

#[derive(Debug, Clone)]
struct PendingFlow {
    domain: String,
    source: ConfigEntrySource,
}

/// Runs config flows and turns finished ones into entries
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    handlers: DashMap<String, Arc<dyn ConfigFlowHandler>>,
    in_progress: DashMap<String, PendingFlow>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            handlers: DashMap::new(),
            in_progress: DashMap::new(),
        }
    }

    pub fn register(&self, domain: &str, handler: Arc<dyn ConfigFlowHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered config flow for domain: {}", domain);
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        &self.entries
    }

    fn handler(&self, domain: &str) -> Result<Arc<dyn ConfigFlowHandler>, FlowError> {
        self.handlers
            .get(domain)
            .map(|h| h.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))
    }

    /// Start a flow
    ///
    /// Import flows run the import step with `data` (empty if `None`);
    /// other sources run the user step.
    pub async fn init(
        &self,
        domain: &str,
        source: ConfigEntrySource,
        data: Option<HashMap<String, Value>>,
    ) -> Result<FlowResult, FlowError> {
        let handler = self.handler(domain)?;
        let flow_id = ulid::Ulid::new().to_string();
        debug!(%flow_id, domain, ?source, "Starting config flow");

        let ctx = FlowContext {
            source,
            domain,
            entries: &self.entries,
        };
        let step = match source {
            ConfigEntrySource::Import => {
                handler.step_import(&ctx, data.unwrap_or_default()).await
            }
            _ => handler.step_user(&ctx, data).await,
        };

        self.finish(flow_id, domain, source, step).await
    }

    /// Submit input to a flow that is showing a form
    pub async fn configure(
        &self,
        flow_id: &str,
        input: HashMap<String, Value>,
    ) -> Result<FlowResult, FlowError> {
        let pending = self
            .in_progress
            .get(flow_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        let handler = self.handler(&pending.domain)?;

        let ctx = FlowContext {
            source: pending.source,
            domain: &pending.domain,
            entries: &self.entries,
        };
        let step = handler.step_user(&ctx, Some(input)).await;

        self.finish(flow_id.to_string(), &pending.domain, pending.source, step)
            .await
    }

    /// Drop a flow waiting on input
    pub fn abort(&self, flow_id: &str) -> bool {
        self.in_progress.remove(flow_id).is_some()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    async fn finish(
        &self,
        flow_id: String,
        domain: &str,
        source: ConfigEntrySource,
        step: StepResult,
    ) -> Result<FlowResult, FlowError> {
        let handler = domain.to_string();

        match step {
            StepResult::ShowForm {
                step_id,
                data_schema,
                errors,
            } => {
                self.in_progress.insert(
                    flow_id.clone(),
                    PendingFlow {
                        domain: domain.to_string(),
                        source,
                    },
                );
                Ok(FlowResult::Form {
                    flow_id,
                    handler,
                    step_id,
                    data_schema,
                    errors,
                })
            }
            StepResult::Abort { reason } => {
                self.in_progress.remove(&flow_id);
                debug!(%flow_id, %reason, "Config flow aborted");
                Ok(FlowResult::Abort {
                    flow_id,
                    handler,
                    reason,
                })
            }
            StepResult::CreateEntry {
                title,
                data,
                unique_id,
            } => {
                self.in_progress.remove(&flow_id);

                let mut entry = ConfigEntry::new(domain, title.clone())
                    .with_data(data)
                    .with_source(source);
                entry.unique_id = unique_id;

                let entry = match self.entries.add(entry).await {
                    Ok(entry) => entry,
                    Err(ConfigEntriesError::AlreadyExists { .. }) => {
                        return Ok(FlowResult::Abort {
                            flow_id,
                            handler,
                            reason: "already_configured".to_string(),
                        });
                    }
                    Err(e) => return Err(e.into()),
                };

                info!("Config flow created entry {} for {}", entry.entry_id, domain);
                if let Err(e) = self.entries.setup(&entry.entry_id).await {
                    warn!("Setup of new entry {} did not complete: {}", entry.entry_id, e);
                }

                Ok(FlowResult::CreateEntry {
                    flow_id,
                    handler,
                    title,
                    entry_id: entry.entry_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use serde_json::json;
    use tempfile::TempDir;

    const DOMAIN: &str = "bmw_connected_drive";

    /// Asks for a username, creates an entry keyed by it
    struct UsernameFlow;

    #[async_trait]
    impl ConfigFlowHandler for UsernameFlow {
        async fn step_user(
            &self,
            ctx: &FlowContext<'_>,
            input: Option<HashMap<String, Value>>,
        ) -> StepResult {
            let username = input
                .as_ref()
                .and_then(|i| i.get("username"))
                .and_then(Value::as_str)
                .map(str::to_string);

            match username {
                None => StepResult::ShowForm {
                    step_id: "user".to_string(),
                    data_schema: vec![FormField::required("username", "string")],
                    errors: HashMap::new(),
                },
                Some(name) if ctx.is_configured(&name) => StepResult::abort("already_configured"),
                Some(name) => StepResult::CreateEntry {
                    title: name.clone(),
                    data: input.unwrap_or_default(),
                    unique_id: Some(name),
                },
            }
        }
    }

    fn create_manager() -> (TempDir, FlowManager) {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Storage::new(dir.path())));
        let flows = FlowManager::new(entries);
        flows.register(DOMAIN, Arc::new(UsernameFlow));
        (dir, flows)
    }

    fn input(username: &str) -> HashMap<String, Value> {
        HashMap::from([("username".to_string(), json!(username))])
    }

    #[tokio::test]
    async fn test_form_then_create() {
        let (_dir, flows) = create_manager();

        let result = flows.init(DOMAIN, ConfigEntrySource::User, None).await.unwrap();
        let FlowResult::Form { flow_id, step_id, .. } = result else {
            panic!("expected form");
        };
        assert_eq!(step_id, "user");
        assert_eq!(flows.in_progress_count(), 1);

        let result = flows.configure(&flow_id, input("a")).await.unwrap();
        let FlowResult::CreateEntry { entry_id, title, .. } = result else {
            panic!("expected entry");
        };
        assert_eq!(title, "a");
        assert_eq!(flows.in_progress_count(), 0);

        let entry = flows.entries().get(&entry_id).unwrap();
        assert_eq!(entry.unique_id.as_deref(), Some("a"));
        assert!(entry.is_loaded());
    }

    #[tokio::test]
    async fn test_import_uses_user_step() {
        let (_dir, flows) = create_manager();

        let result = flows
            .init(DOMAIN, ConfigEntrySource::Import, Some(input("a")))
            .await
            .unwrap();
        let FlowResult::CreateEntry { entry_id, .. } = result else {
            panic!("expected entry");
        };
        assert_eq!(
            flows.entries().get(&entry_id).unwrap().source,
            ConfigEntrySource::Import
        );
    }

    #[tokio::test]
    async fn test_second_flow_aborts() {
        let (_dir, flows) = create_manager();
        flows
            .init(DOMAIN, ConfigEntrySource::Import, Some(input("a")))
            .await
            .unwrap();

        let result = flows
            .init(DOMAIN, ConfigEntrySource::User, Some(input("a")))
            .await
            .unwrap();
        assert!(matches!(result, FlowResult::Abort { ref reason, .. } if reason == "already_configured"));
        assert_eq!(flows.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_flow_and_handler() {
        let (_dir, flows) = create_manager();

        let result = flows.configure("missing", input("a")).await;
        assert!(matches!(result, Err(FlowError::UnknownFlow(_))));

        let result = flows.init("other", ConfigEntrySource::User, None).await;
        assert!(matches!(result, Err(FlowError::UnknownHandler(_))));
    }

    #[tokio::test]
    async fn test_abort_pending_flow() {
        let (_dir, flows) = create_manager();
        let result = flows.init(DOMAIN, ConfigEntrySource::User, None).await.unwrap();

        assert!(flows.abort(result.flow_id()));
        assert!(!flows.abort(result.flow_id()));
        assert_eq!(flows.in_progress_count(), 0);
    }

    #[test]
    fn test_flow_result_serialization() {
        let result = FlowResult::Abort {
            flow_id: "f".to_string(),
            handler: DOMAIN.to_string(),
            reason: "already_configured".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "abort");
        assert_eq!(json["reason"], "already_configured");
    }
}
