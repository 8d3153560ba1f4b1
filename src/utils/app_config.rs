/// Application configuration management
/// Stores user preferences in ~/.config/consultify/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Wallet key file used as the default signer
    pub wallet_path: Option<String>,
    /// Local store file (session and hand-off data)
    pub store_path: Option<String>,
}

impl AppConfig {
    /// Get config directory, creating it if needed
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("consultify");

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, defaulting when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .context("Failed to read config file")?;

        let config: Self = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Wallet key file, falling back to `wallet.json` next to the config
    pub fn wallet_path(&self) -> Result<PathBuf> {
        match &self.wallet_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::config_dir()?.join("wallet.json")),
        }
    }

    /// Store file, falling back to the platform data directory
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store_path {
            return Ok(PathBuf::from(path));
        }
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("consultify");
        fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;
        Ok(data_dir.join("storage.json"))
    }

    /// Set and save wallet path
    pub fn set_wallet_path(&mut self, path: PathBuf) -> Result<()> {
        self.wallet_path = Some(path.to_string_lossy().to_string());
        self.save()
    }
}
