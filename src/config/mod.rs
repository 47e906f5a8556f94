use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config/config.json";
const DEFAULT_TEMPLATE_DIR: &str = "templates";
const DEFAULT_STORAGE_DIR: &str = "./storage";
const DEFAULT_SECRETS_PATH: &str = ".env";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidSetting { key: &'static str, value: String },
}

/// A peer module as listed in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl PeerDescriptor {
    pub fn id_url(&self) -> String {
        format!("http://{}:{}/id", self.ip, self.port)
    }
}

/// Identity of this module plus the peers it knows about.
///
/// Keys other than `id` and `modules` are kept in `extra` so a module can
/// carry its own settings in the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    #[serde(default)]
    pub modules: Vec<PeerDescriptor>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModuleConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ModuleConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            id = %config.id,
            peers = config.modules.len(),
            path = %path.display(),
            "loaded module config"
        );
        Ok(config)
    }

    /// Returns the configured peer with the given `name`, if any.
    pub fn module_config(&self, name: &str) -> Option<&PeerDescriptor> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Process-level launch settings, read from `LANMODULE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub template_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub secrets_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub scan_interval: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            secrets_path: PathBuf::from(DEFAULT_SECRETS_PATH),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            scan_interval: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(v) = get("LANMODULE_CONFIG") {
            settings.config_path = PathBuf::from(v);
        }
        if let Some(v) = get("LANMODULE_TEMPLATES") {
            settings.template_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LANMODULE_STORAGE") {
            settings.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LANMODULE_SECRETS") {
            settings.secrets_path = PathBuf::from(v);
        }
        if let Some(v) = get("LANMODULE_HOST") {
            settings.host = v.trim().to_string();
        }
        if let Some(v) = get("LANMODULE_PORT") {
            settings.port = v.trim().parse().map_err(|_| ConfigError::InvalidSetting {
                key: "LANMODULE_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("LANMODULE_SCAN_INTERVAL_SECS") {
            let secs: u64 = v.trim().parse().map_err(|_| ConfigError::InvalidSetting {
                key: "LANMODULE_SCAN_INTERVAL_SECS",
                value: v.clone(),
            })?;
            // zero means "scan once", same as unset
            settings.scan_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(settings)
    }
}
