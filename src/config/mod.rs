// Configuration management for PodPipe
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::download::NotificationVisibility;
use anyhow::{Context, Result};
use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database_path: PathBuf,
    pub downloads: DownloadConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Every download destination is resolved below this directory
    pub root: PathBuf,
    pub user_agent: String,
    #[serde(default)]
    pub notification: NotificationVisibility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub filter: String,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = app_dir(config_dir());
        let data_dir = app_dir(data_dir());

        Self {
            database_path: config_dir.join("podpipe.db"),
            downloads: DownloadConfig {
                root: data_dir.join("downloads"),
                user_agent: format!("podpipe/{}", env!("CARGO_PKG_VERSION")),
                notification: NotificationVisibility::default(),
            },
            logging: LoggingConfig {
                directory: data_dir.join("logs"),
                filter: "info,podpipe=debug".to_string(),
            },
        }
    }
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("podpipe")
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    /// Load from `path`, writing the defaults there first if it doesn't exist.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path()?)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("podpipe");

        Ok(config_dir.join("config.toml"))
    }
}
