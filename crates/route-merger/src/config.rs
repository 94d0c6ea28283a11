//! Engine configuration read from the environment.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::finalizer::DEFAULT_FINALIZER;
use crate::merge::{InsertPosition, DEFAULT_INSERT_POSITION};

pub const ENV_STORE_DIR: &str = "ROUTE_MERGER_STORE_DIR";
pub const ENV_NAMESPACES: &str = "NAMESPACES_TO_WATCH";
pub const ENV_FINALIZER: &str = "ROUTE_MERGER_FINALIZER";
pub const ENV_INSERT_POSITION: &str = "ROUTE_MERGER_INSERT_POSITION";
pub const ENV_RESYNC_SECS: &str = "ROUTE_MERGER_RESYNC_SECS";
pub const ENV_PIN_TARGET_NAMESPACE: &str = "ROUTE_MERGER_PIN_TARGET_NAMESPACE";
pub const ENV_LOG_FORMAT: &str = "ROUTE_MERGER_LOG_FORMAT";

const DEFAULT_STORE_DIR: &str = "./resources";
const DEFAULT_RESYNC_SECS: u64 = 300;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set.
    pub default_directive: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_directive: DEFAULT_LOG_DIRECTIVE.to_string(),
        }
    }
}

/// Namespaces whose patches are reconciled. Empty means all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    namespaces: BTreeSet<String>,
}

impl NamespaceFilter {
    /// Parses a comma separated list. Blank entries are ignored.
    pub fn parse(list: &str) -> Self {
        Self {
            namespaces: list
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn watches(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.contains(namespace)
    }

    pub fn is_all(&self) -> bool {
        self.namespaces.is_empty()
    }
}

impl std::fmt::Display for NamespaceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_all() {
            return write!(f, "<all>");
        }
        let list: Vec<&str> = self.namespaces.iter().map(String::as_str).collect();
        write!(f, "{}", list.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub store_dir: PathBuf,
    pub namespaces: NamespaceFilter,
    pub finalizer: String,
    pub insert_position: InsertPosition,
    /// `None` disables periodic resync.
    pub resync_interval: Option<Duration>,
    pub pin_target_namespace: bool,
    pub log: LogSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            namespaces: NamespaceFilter::default(),
            finalizer: DEFAULT_FINALIZER.to_string(),
            insert_position: DEFAULT_INSERT_POSITION,
            resync_interval: Some(Duration::from_secs(DEFAULT_RESYNC_SECS)),
            pin_target_namespace: false,
            log: LogSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`. Unset and blank values fall
    /// back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_STORE_DIR) {
            config.store_dir = PathBuf::from(dir.trim());
        }

        if let Some(list) = get(ENV_NAMESPACES) {
            config.namespaces = NamespaceFilter::parse(&list);
        }

        if let Some(finalizer) = get(ENV_FINALIZER) {
            config.finalizer = finalizer.trim().to_string();
        }

        if let Some(position) = get(ENV_INSERT_POSITION) {
            config.insert_position = position
                .parse()
                .map_err(|reason| invalid(ENV_INSERT_POSITION, &position, reason))?;
        }

        if let Some(secs) = get(ENV_RESYNC_SECS) {
            let parsed: u64 = secs
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_RESYNC_SECS, &secs, e.to_string()))?;
            config.resync_interval = (parsed > 0).then(|| Duration::from_secs(parsed));
        }

        if let Some(flag) = get(ENV_PIN_TARGET_NAMESPACE) {
            config.pin_target_namespace = parse_bool(&flag)
                .ok_or_else(|| invalid(ENV_PIN_TARGET_NAMESPACE, &flag, "expected true or false".to_string()))?;
        }

        if let Some(format) = get(ENV_LOG_FORMAT) {
            config.log.format = format
                .parse()
                .map_err(|reason| invalid(ENV_LOG_FORMAT, &format, reason))?;
        }

        Ok(config)
    }
}

fn invalid(name: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
