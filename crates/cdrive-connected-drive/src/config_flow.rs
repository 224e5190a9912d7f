//! Config flow for ConnectedDrive accounts
//!
//! Validates credentials with one blocking state refresh against the
//! portal before an entry is created. The probe account is discarded; it
//! never registers services or timers.

use async_trait::async_trait;
use cdrive_config_entries::{ConfigFlowHandler, FlowContext, FormField, StepResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::account::ConnectedDriveAccount;
use crate::config::AccountConfig;
use crate::executor::Executor;
use crate::region::Region;
use crate::vehicle::{SessionFactory, VehicleError};
use crate::{CONF_PASSWORD, CONF_READ_ONLY, CONF_REGION, CONF_USERNAME};

pub const STEP_USER: &str = "user";

pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERROR_INVALID_AUTH: &str = "invalid_auth";
pub const ERROR_INVALID_INPUT: &str = "invalid_input";
pub const ERROR_UNKNOWN: &str = "unknown";
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";

pub struct ConnectedDriveFlow {
    factory: Arc<dyn SessionFactory>,
    executor: Executor,
}

impl ConnectedDriveFlow {
    pub fn new(factory: Arc<dyn SessionFactory>, executor: Executor) -> Self {
        Self { factory, executor }
    }

    pub fn data_schema() -> Vec<FormField> {
        vec![
            FormField::required(CONF_USERNAME, "string"),
            FormField::required(CONF_PASSWORD, "password"),
            FormField::required(CONF_REGION, "select")
                .with_options(Region::ALL.iter().map(Region::as_str)),
            FormField::optional(CONF_READ_ONLY, "boolean").with_default(json!(false)),
        ]
    }

    fn show_form(error: Option<&str>) -> StepResult {
        let errors = error
            .map(|e| HashMap::from([("base".to_string(), e.to_string())]))
            .unwrap_or_default();
        StepResult::ShowForm {
            step_id: STEP_USER.to_string(),
            data_schema: Self::data_schema(),
            errors,
        }
    }

    /// Log in and fetch once; returns the form error key on failure
    async fn probe(&self, config: AccountConfig) -> Result<(), &'static str> {
        let factory = self.factory.clone();
        let name = config.username.clone();

        let result = self
            .executor
            .run(move || -> Result<(), VehicleError> {
                let account = ConnectedDriveAccount::connect(name, config, factory.as_ref())?;
                account.refresh().map(|_| ())
            })
            .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(VehicleError::Connection(reason))) => {
                debug!(%reason, "Cannot connect to the ConnectedDrive portal");
                Err(ERROR_CANNOT_CONNECT)
            }
            Ok(Err(VehicleError::Authentication(reason))) => {
                debug!(%reason, "Invalid ConnectedDrive credentials");
                Err(ERROR_INVALID_AUTH)
            }
            Ok(Err(e)) => {
                error!("Unexpected error validating ConnectedDrive account: {}", e);
                Err(ERROR_UNKNOWN)
            }
            Err(e) => {
                error!("Unexpected error validating ConnectedDrive account: {}", e);
                Err(ERROR_UNKNOWN)
            }
        }
    }
}

#[async_trait]
impl ConfigFlowHandler for ConnectedDriveFlow {
    async fn step_user(
        &self,
        ctx: &FlowContext<'_>,
        input: Option<HashMap<String, Value>>,
    ) -> StepResult {
        let Some(input) = input else {
            return Self::show_form(None);
        };

        let config = match AccountConfig::from_entry_data(&input) {
            Ok(config) => config,
            Err(e) => {
                debug!("Rejected account input: {}", e);
                return Self::show_form(Some(ERROR_INVALID_INPUT));
            }
        };

        let unique_id = config.unique_id();
        if ctx.is_configured(&unique_id) {
            return StepResult::abort(ABORT_ALREADY_CONFIGURED);
        }

        match self.probe(config.clone()).await {
            Ok(()) => StepResult::CreateEntry {
                title: config.username.clone(),
                data: config.to_entry_data(),
                unique_id: Some(unique_id),
            },
            Err(error) => Self::show_form(Some(error)),
        }
    }
}
