//! Service call payload handed to registered handlers

use crate::Context;
use serde::{Deserialize, Serialize};

/// A call to a registered service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Integration domain (e.g. "bmw_connected_drive")
    pub domain: String,

    /// Service name (e.g. "light_flash")
    pub service: String,

    /// Call data, already validated against the service schema
    pub data: serde_json::Value,

    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data,
            context,
        }
    }

    /// Full identifier in `domain.service` form
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Deserialize a single field of the call data
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Borrow a string field of the call data
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}
