//! Account configuration
//!
//! The same shape is used for config entry data, config flow input and
//! the `bmw_connected_drive:` section of `configuration.yaml`.

use cdrive_config::{section, ConfigResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;

use crate::region::Region;
use crate::{CONF_PASSWORD, CONF_READ_ONLY, CONF_REGION, CONF_USERNAME, DOMAIN};

/// Credentials and options for one ConnectedDrive account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    pub region: Region,
    /// Read-only accounts never expose remote services
    #[serde(default)]
    pub read_only: bool,
}

impl AccountConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>, region: Region) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            region,
            read_only: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Identity used to reject a second entry for the same account
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.region, self.username)
    }

    /// Config entry data for this account
    pub fn to_entry_data(&self) -> HashMap<String, Value> {
        HashMap::from([
            (CONF_USERNAME.to_string(), json!(self.username)),
            (CONF_PASSWORD.to_string(), json!(self.password)),
            (CONF_REGION.to_string(), json!(self.region.as_str())),
            (CONF_READ_ONLY.to_string(), json!(self.read_only)),
        ])
    }

    pub fn from_entry_data(data: &HashMap<String, Value>) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, Value> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(map))
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"**REDACTED**")
            .field("region", &self.region)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// `configuration.yaml` accounts, keyed by the user's account name
pub type AccountsSection = IndexMap<String, AccountConfig>;

/// Read the integration's section; absent means no accounts
pub fn accounts_from_yaml(root: &serde_yaml::Value) -> ConfigResult<AccountsSection> {
    Ok(section::<AccountsSection>(root, DOMAIN)?.unwrap_or_default())
}
