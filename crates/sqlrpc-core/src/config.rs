//! Runtime settings: connection strings, timeouts, command-text overrides.
//!
//! Settings come from an optional YAML file and are then overlaid with
//! environment variables:
//!
//! - `SQLRPC_CONFIG`: path of the YAML settings file
//! - `SQLRPC_CONNECTION_<NAME>`: connection string for logical name `<name>`
//! - `SQLRPC_CONNECT_TIMEOUT_SECS`: connect timeout (default: 15)
//! - `SQLRPC_COMMAND_TIMEOUT_SECS`: command timeout (default: 30)
//! - `SQLRPC_COMMAND_ROOT`: directory searched for `.sql` overrides

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

const CONNECTION_ENV_PREFIX: &str = "SQLRPC_CONNECTION_";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Logical connection name → connection string.
    #[serde(default)]
    pub connection_strings: HashMap<String, String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Root searched for `SQLAPI/<category>/<version>/<name>/<method>.sql`.
    #[serde(default)]
    pub command_root: Option<PathBuf>,
    /// Service manifests loaded at startup, relative to the settings file.
    #[serde(default)]
    pub manifests: Vec<PathBuf>,
    /// Directory of the settings file; relative `Data Source` paths resolve
    /// against it.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_strings: HashMap::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            command_root: None,
            manifests: Vec::new(),
            base_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. Relative `commandRoot`, manifest and
    /// `Data Source` paths are resolved against the file's directory.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_yaml_str(&text)?;

        if let Some(base) = path.parent() {
            if let Some(root) = settings.command_root.take() {
                settings.command_root = Some(resolve(base, root));
            }
            settings.manifests = settings
                .manifests
                .into_iter()
                .map(|m| resolve(base, m))
                .collect();
            settings.base_dir = Some(base.to_path_buf());
        }
        Ok(settings)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Load from `SQLRPC_CONFIG` when set, then overlay the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = match std::env::var("SQLRPC_CONFIG") {
            Ok(path) => Self::from_yaml_file(path)?,
            Err(_) => Self::default(),
        };
        settings.with_env_overrides()
    }

    /// Overlay `SQLRPC_*` environment variables on top of these settings.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(std::env::vars())
    }

    fn with_overrides(
        mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(CONNECTION_ENV_PREFIX) {
                self.connection_strings
                    .insert(name.to_ascii_lowercase(), value);
                continue;
            }
            match key.as_str() {
                "SQLRPC_CONNECT_TIMEOUT_SECS" => {
                    self.connect_timeout_secs = value.parse().map_err(|_| {
                        ConfigError::Invalid("SQLRPC_CONNECT_TIMEOUT_SECS", "must be a positive integer")
                    })?;
                }
                "SQLRPC_COMMAND_TIMEOUT_SECS" => {
                    self.command_timeout_secs = value.parse().map_err(|_| {
                        ConfigError::Invalid("SQLRPC_COMMAND_TIMEOUT_SECS", "must be a positive integer")
                    })?;
                }
                "SQLRPC_COMMAND_ROOT" => self.command_root = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(self)
    }

    pub fn with_connection(mut self, name: impl Into<String>, conn_str: impl Into<String>) -> Self {
        self.connection_strings.insert(name.into(), conn_str.into());
        self
    }

    /// Look up a connection string by logical name (case-insensitive).
    pub fn connection_string(&self, name: &str) -> Option<&str> {
        self.connection_strings
            .get(name)
            .or_else(|| {
                self.connection_strings
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// A parsed SQLite connection string.
///
/// Accepts either a bare path (`data/app.db`, `:memory:`) or
/// `key=value` pairs separated by `;`:
/// `Data Source=data/app.db;Connect Timeout=5;Mode=ReadOnly`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub name: String,
    pub path: String,
    pub read_only: bool,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl ConnectionTarget {
    pub fn parse(name: &str, conn_str: &str, settings: &Settings) -> Result<Self, ConfigError> {
        let mut target = Self {
            name: name.to_string(),
            path: String::new(),
            read_only: false,
            connect_timeout: settings.connect_timeout(),
            command_timeout: settings.command_timeout(),
        };

        if !conn_str.contains('=') {
            target.path = database_path(conn_str.trim(), settings);
            return Ok(target);
        }

        for pair in conn_str.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::ConnectionString(name.to_string(), pair.to_string()))?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "data source" | "datasource" | "filename" | "path" => {
                    target.path = database_path(value, settings)
                }
                "connect timeout" | "connection timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        ConfigError::ConnectionString(name.to_string(), pair.to_string())
                    })?;
                    target.connect_timeout = Duration::from_secs(secs);
                }
                "command timeout" | "default command timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        ConfigError::ConnectionString(name.to_string(), pair.to_string())
                    })?;
                    target.command_timeout = Duration::from_secs(secs);
                }
                "mode" => target.read_only = value.eq_ignore_ascii_case("readonly"),
                other => {
                    tracing::warn!("Ignoring unknown connection string key '{}' for '{}'", other, name)
                }
            }
        }

        if target.path.is_empty() {
            return Err(ConfigError::ConnectionString(
                name.to_string(),
                "missing Data Source".to_string(),
            ));
        }
        Ok(target)
    }
}

/// `path` joined onto the settings directory when relative. In-memory and
/// `file:` URI sources are left alone.
fn database_path(path: &str, settings: &Settings) -> String {
    match &settings.base_dir {
        Some(base)
            if !path.is_empty()
                && path != ":memory:"
                && !path.starts_with("file:")
                && Path::new(path).is_relative() =>
        {
            base.join(path).to_string_lossy().into_owned()
        }
        _ => path.to_string(),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    #[error("invalid connection string for '{0}': {1}")]
    ConnectionString(String, String),
}
