//! YAML loader with tag resolution

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde::de::DeserializeOwned;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Loads YAML documents relative to a config directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for circular include detection
    loading: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a loader, reading `secrets.yaml` from `config_dir` if present
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            loading: HashSet::new(),
        }
    }

    /// Load a file; relative paths resolve against the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        };

        if !self.loading.insert(path.clone()) {
            return Err(ConfigError::CircularInclude { path });
        }

        debug!(?path, "Loading YAML file");
        let result = fs::read_to_string(&path)
            .map_err(|source| ConfigError::ReadFile {
                path: path.clone(),
                source,
            })
            .and_then(|content| self.load_string(&content, &path));

        self.loading.remove(&path);
        result
    }

    /// Parse YAML text; `source_path` anchors relative `!include` paths
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.resolve(value, source_path)
    }

    fn resolve(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, source_path),
            Value::Mapping(map) => {
                let mut resolved = serde_yaml::Mapping::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k, self.resolve(v, source_path)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(%tag, "Resolving tag");

        match tag.as_str() {
            "!secret" => {
                let key = tag_argument(&tag, tagged.value)?;
                Ok(Value::String(self.secrets.get(&key)?.to_string()))
            }
            "!env_var" => {
                let var = tag_argument(&tag, tagged.value)?;
                std::env::var(&var)
                    .map(Value::String)
                    .map_err(|_| ConfigError::EnvVarNotFound { var })
            }
            "!include" => {
                let target = tag_argument(&tag, tagged.value)?;
                let base = source_path.parent().unwrap_or(&self.config_dir);
                let target = base.join(target);
                self.load_file(target)
            }
            _ => {
                let value = self.resolve(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn tag_argument(tag: &str, value: Value) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(ConfigError::InvalidValue {
            key: tag.to_string(),
            reason: "tag argument must be a string".to_string(),
        }),
    }
}

/// Load `file` from `config_dir` with all tags resolved
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

/// Load YAML text with all tags resolved
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<Value> {
    let config_dir = config_dir.into();
    let source = config_dir.join(source_name);
    YamlLoader::new(config_dir)?.load_string(content, &source)
}

/// Deserialize the top-level section `key`, if present
pub fn section<T: DeserializeOwned>(root: &Value, key: &str) -> ConfigResult<Option<T>> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}
