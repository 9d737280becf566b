// Configuration management for the blemesh CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/blemesh/config.json
// - Linux: ~/.config/blemesh/config.json
// - Windows: %APPDATA%\blemesh\config.json

use anyhow::{Context, Result};
use blemesh_core::MeshConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "blemesh";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage path for messages, peers and identity
    pub storage_path: Option<String>,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Routing knobs handed to the core
    pub mesh: MeshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: None,
            log_level: "warn".to_string(),
            mesh: MeshConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join(APP_DIR);
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join(APP_DIR);
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .mesh
                .validate()
                .context("Invalid mesh settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Where the sled database lives
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("storage")),
        }
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    /// Set a config value in memory. Mesh values are validated as a whole.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut mesh = self.mesh.clone();
        match key {
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                return Ok(());
            }
            "log_level" => {
                self.log_level = value.to_string();
                return Ok(());
            }
            "default_ttl" => mesh.default_ttl = value.parse().context("Invalid TTL")?,
            "presence_throttle_ms" => {
                mesh.presence_throttle_ms = value.parse().context("Invalid number")?
            }
            "dedup_bucket_ms" => mesh.dedup_bucket_ms = value.parse().context("Invalid number")?,
            "dedup_capacity" => mesh.dedup_capacity = value.parse().context("Invalid number")?,
            "dedup_retention_buckets" => {
                mesh.dedup_retention_buckets = value.parse().context("Invalid number")?
            }
            "housekeeping_interval_ms" => {
                mesh.housekeeping_interval_ms = value.parse().context("Invalid number")?
            }
            "peer_timeout_ms" => mesh.peer_timeout_ms = value.parse().context("Invalid number")?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        mesh.validate()?;
        self.mesh = mesh;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let mesh = &self.mesh;
        vec![
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("log_level".to_string(), self.log_level.clone()),
            ("default_ttl".to_string(), mesh.default_ttl.to_string()),
            ("presence_throttle_ms".to_string(), mesh.presence_throttle_ms.to_string()),
            ("dedup_bucket_ms".to_string(), mesh.dedup_bucket_ms.to_string()),
            ("dedup_capacity".to_string(), mesh.dedup_capacity.to_string()),
            (
                "dedup_retention_buckets".to_string(),
                mesh.dedup_retention_buckets.to_string(),
            ),
            (
                "housekeeping_interval_ms".to_string(),
                mesh.housekeeping_interval_ms.to_string(),
            ),
            ("peer_timeout_ms".to_string(), mesh.peer_timeout_ms.to_string()),
        ]
    }
}
