//! Key/value configuration and the options recognized by the environment.
//!
//! Values are kept as strings, the way they arrive from files and command
//! lines, and parsed on read through typed [`ConfigOption`] descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;

/// A value type that can be stored in a [`Configuration`].
pub trait ConfigValue: Sized {
    /// Parse the raw string stored under `key`.
    fn parse_value(key: &str, raw: &str) -> Result<Self, ConfigError>;

    /// Render the value for storage.
    fn render(&self) -> String;
}

fn invalid(key: &str, raw: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}

impl ConfigValue for bool {
    fn parse_value(key: &str, raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(key, raw, "expected 'true' or 'false'")),
        }
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for i32 {
    fn parse_value(key: &str, raw: &str) -> Result<Self, ConfigError> {
        raw.trim().parse().map_err(|e| invalid(key, raw, e))
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

impl ConfigValue for u64 {
    fn parse_value(key: &str, raw: &str) -> Result<Self, ConfigError> {
        raw.trim().parse().map_err(|e| invalid(key, raw, e))
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

/// A typed configuration key with its default value.
#[derive(Debug, Clone, Copy)]
pub struct ConfigOption<T> {
    key: &'static str,
    default: T,
    description: &'static str,
}

impl<T: Copy> ConfigOption<T> {
    /// Declare an option.
    pub const fn new(key: &'static str, default: T, description: &'static str) -> Self {
        Self {
            key,
            default,
            description,
        }
    }

    /// Configuration key.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Value used when the key is absent.
    pub fn default_value(&self) -> T {
        self.default
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        self.description
    }
}

/// Whether `execute` waits for the job to finish.
pub const ATTACHED: ConfigOption<bool> = ConfigOption::new(
    "attached",
    true,
    "Wait for the job to finish (true) or return right after submission (false).",
);

/// Whether an attached job is cancelled when the client process exits.
pub const SHUTDOWN_ON_ATTACHED_EXIT: ConfigOption<bool> = ConfigOption::new(
    "shutdown-on-attached-exit",
    false,
    "Cancel an attached job when the client process is terminated.",
);

/// Default parallelism for submitted workloads; values <= 0 mean unset.
pub const DEFAULT_PARALLELISM: ConfigOption<i32> = ConfigOption::new(
    "default-parallelism",
    -1,
    "Parallelism applied to workloads that do not set one. Values <= 0 leave it unset.",
);

/// Upper bound on waiting for a cancellation acknowledgment during shutdown.
pub const SHUTDOWN_CANCEL_TIMEOUT_MS: ConfigOption<u64> = ConfigOption::new(
    "shutdown-cancel-timeout-ms",
    1000,
    "Milliseconds to wait for a cancellation acknowledgment while the process exits.",
);

/// Simulated run time of one stage on the in-process cluster.
pub const LOCAL_STAGE_DURATION_MS: ConfigOption<u64> = ConfigOption::new(
    "local.stage-duration-ms",
    100,
    "Milliseconds each stage takes on the in-process cluster.",
);

/// Key/value configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, String>,
}

impl Configuration {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an option, falling back to its default when absent.
    pub fn get<T: ConfigValue + Copy>(&self, option: &ConfigOption<T>) -> Result<T, ConfigError> {
        match self.entries.get(option.key()) {
            Some(raw) => T::parse_value(option.key(), raw),
            None => Ok(option.default_value()),
        }
    }

    /// Store a typed value.
    pub fn set<T: ConfigValue + Copy>(&mut self, option: &ConfigOption<T>, value: T) {
        self.entries.insert(option.key().to_string(), value.render());
    }

    /// Builder form of [`Configuration::set`].
    pub fn with<T: ConfigValue + Copy>(mut self, option: &ConfigOption<T>, value: T) -> Self {
        self.set(option, value);
        self
    }

    /// Store a raw string value.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Raw string value for a key.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterate over explicitly set entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of explicitly set entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is explicitly set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a `key=value` dynamic property.
    pub fn parse_property(property: &str) -> Result<(String, String), ConfigError> {
        match property.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(ConfigError::Load(format!(
                "expected 'key=value', got '{}'",
                property
            ))),
        }
    }

    /// Parse a flat JSON object. Scalar values are stored as strings.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        let serde_json::Value::Object(map) = value else {
            return Err(ConfigError::Load("expected a JSON object".to_string()));
        };

        let mut config = Configuration::new();
        for (key, value) in map {
            let raw = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(ConfigError::Load(format!(
                        "unsupported value for '{}': {}",
                        key, other
                    )))
                }
            };
            config.entries.insert(key, raw);
        }
        Ok(config)
    }

    /// Load a flat JSON object from a file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }
}
