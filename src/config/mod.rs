use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Configuration {
    pub logs_dir: String,
    /// Directory for per-room message journals; memory-only when unset.
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Public address of the wallet this client acts for. Observer
    /// deployments leave it unset.
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Base URL of the authoritative message history service.
    #[serde(default)]
    pub history_url: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Trade rooms to join at startup, besides the global room.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// PKR rate table per token, e.g. `USDC = 280.0`.
    #[serde(default)]
    pub rates: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub config: Configuration,
}

impl Settings {
    pub fn load(config_path: &Option<std::path::PathBuf>) -> Result<Self, SettingsError> {
        let path: &Path = config_path
            .as_deref()
            .unwrap_or_else(|| Path::new("config.toml"));

        let builder = Config::builder().add_source(File::from(path).required(true));

        match builder.build() {
            Ok(cfg) => match cfg.try_deserialize::<Settings>() {
                Ok(settings) => Ok(settings),
                Err(err) => {
                    error!("❌ Failed to deserialize configuration: {err}");
                    Err(SettingsError::Load(err))
                }
            },
            Err(err) => {
                error!(
                    "❌ Failed to load configuration from '{}': {err}",
                    path.display()
                );
                Err(SettingsError::Load(err))
            }
        }
    }
}
