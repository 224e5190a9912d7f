//! Service registry with schema-validated async handlers
//!
//! Integrations expose commands as services keyed by `domain.service`.
//! A service may carry a JSON schema; call data is validated against it
//! before the handler runs, so handlers can rely on the shape of their input.

mod context;
mod service_call;

pub use context::{CallOrigin, Context};
pub use service_call::ServiceCall;

use dashmap::DashMap;
use jsonschema::JSONSchema;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future returned by service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Type-erased service handler
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when registering or calling services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("invalid schema for {service}: {reason}")]
    InvalidSchema { service: String, reason: String },

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("service call failed: {0}")]
    CallFailed(String),
}

/// Description of a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON schema the call data must satisfy
    pub schema: Option<serde_json::Value>,
}

impl ServiceDescription {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            description: None,
            schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    fn key(&self) -> String {
        service_key(&self.domain, &self.service)
    }
}

struct RegisteredService {
    handler: ServiceHandler,
    validator: Option<Arc<JSONSchema>>,
    description: ServiceDescription,
}

fn service_key(domain: &str, service: &str) -> String {
    format!("{}.{}", domain, service)
}

/// Registry of callable services
///
/// Registering a service under an existing key replaces the previous
/// handler.
pub struct ServiceRegistry {
    services: DashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a service
    ///
    /// Fails only when the description carries a schema that does not
    /// compile.
    #[instrument(skip_all, fields(domain = %description.domain, service = %description.service))]
    pub fn register<F, Fut>(
        &self,
        description: ServiceDescription,
        handler: F,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let validator = match &description.schema {
            Some(schema) => {
                let compiled =
                    JSONSchema::compile(schema).map_err(|e| ServiceError::InvalidSchema {
                        service: description.key(),
                        reason: e.to_string(),
                    })?;
                Some(Arc::new(compiled))
            }
            None => None,
        };

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        debug!("Registering service");
        self.services.insert(
            description.key(),
            RegisteredService {
                handler,
                validator,
                description,
            },
        );
        Ok(())
    }

    /// Call a service
    ///
    /// `null` call data is treated as an empty object.
    #[instrument(skip(self, data, context), fields(context_id = %context.id))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        let data = if data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            data
        };

        let (handler, validator) = {
            let registered = self
                .services
                .get(&service_key(domain, service))
                .ok_or_else(|| {
                    warn!("Service not found");
                    ServiceError::NotFound {
                        domain: domain.to_string(),
                        service: service.to_string(),
                    }
                })?;
            (registered.handler.clone(), registered.validator.clone())
        };

        if let Some(validator) = validator {
            if let Err(errors) = validator.validate(&data) {
                let reason = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(%reason, "Rejected service data");
                return Err(ServiceError::InvalidData(reason));
            }
        }

        debug!("Calling service");
        handler(ServiceCall::new(domain, service, data, context)).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&service_key(domain, service))
    }

    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        self.services
            .get(&service_key(domain, service))
            .map(|s| s.description.clone())
    }

    /// All services registered for a domain, sorted by name
    pub fn domain_services(&self, domain: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.service.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove a service; returns whether it was registered
    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self
            .services
            .remove(&service_key(domain, service))
            .is_some();
        if removed {
            debug!("Unregistered service");
        }
        removed
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedServiceRegistry = Arc<ServiceRegistry>;
