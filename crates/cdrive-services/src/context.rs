//! Call context for tracing who triggered a service call

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Where a service call originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    /// Issued by a user or an external API client
    #[default]
    User,
    /// Issued by the integration itself (timers, setup)
    Internal,
}

/// Context attached to every service call
///
/// Carries a ULID so log lines belonging to one call can be correlated,
/// plus the origin and optional user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,

    #[serde(default)]
    pub origin: CallOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            origin: CallOrigin::User,
            user_id: None,
        }
    }

    /// Context for calls made by the integration on its own behalf
    pub fn internal() -> Self {
        Self {
            origin: CallOrigin::Internal,
            ..Self::new()
        }
    }

    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_get_distinct_ids() {
        let a = Context::new();
        let b = Context::new();
        assert_ne!(a.id, b.id);
        assert_eq!(a.origin, CallOrigin::User);
    }

    #[test]
    fn test_internal_context() {
        let ctx = Context::internal();
        assert_eq!(ctx.origin, CallOrigin::Internal);
        assert!(ctx.user_id.is_none());
    }

    #[test]
    fn test_user_context_serializes_user() {
        let ctx = Context::with_user("abc");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["user_id"], "abc");
        assert_eq!(json["origin"], "user");
    }
}
