//! YAML configuration loading
//!
//! Loads `configuration.yaml` the way the host does, resolving:
//!
//! - `!secret key` - substitute from `secrets.yaml` next to the config
//! - `!env_var VAR` - substitute from the process environment
//! - `!include path` - splice in another YAML file
//!
//! Integrations then pull their own typed section out of the loaded
//! document with [`section`].
//!
//! ```ignore
//! use cdrive_config::{load_yaml, section};
//!
//! let root = load_yaml("/config", "configuration.yaml")?;
//! let accounts: Option<MySection> = section(&root, "bmw_connected_drive")?;
//! ```

mod error;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, section, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;
