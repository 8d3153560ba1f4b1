/// Configuration management for .env files
///
/// Handles reading, writing, and validating the Consultify network settings.
/// Values resolve from the process environment first, then the .env file.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{
    is_valid_process_id, is_valid_url, DEFAULT_CU_URL, DEFAULT_HYPERBEAM_URL,
    DEFAULT_MESSAGE_POLLING_RATE_MS, DEFAULT_MU_URL, DEFAULT_RPC_TIMEOUT, DEV_CU_URL, DEV_MU_URL,
};

pub const ENVIRONMENT: &str = "CONSULTIFY_ENVIRONMENT";
pub const MU_URL: &str = "CONSULTIFY_MU_URL";
pub const CU_URL: &str = "CONSULTIFY_CU_URL";
pub const ORCHESTRATOR_PROCESS: &str = "CONSULTIFY_ORCHESTRATOR_PROCESS";
pub const PHARMACIST_PROCESS: &str = "CONSULTIFY_PHARMACIST_PROCESS";
pub const TRIAGE_PROCESS: &str = "CONSULTIFY_TRIAGE_PROCESS";
pub const USDA_PROCESS: &str = "CONSULTIFY_USDA_PROCESS";
pub const MESSAGE_POLLING_RATE: &str = "CONSULTIFY_MESSAGE_POLLING_RATE";
pub const HYPERBEAM_URL: &str = "CONSULTIFY_HYPERBEAM_URL";
pub const RPC_TIMEOUT_MS: &str = "CONSULTIFY_RPC_TIMEOUT_MS";

pub const KNOWN_KEYS: &[&str] = &[
    ENVIRONMENT,
    MU_URL,
    CU_URL,
    ORCHESTRATOR_PROCESS,
    PHARMACIST_PROCESS,
    TRIAGE_PROCESS,
    USDA_PROCESS,
    MESSAGE_POLLING_RATE,
    HYPERBEAM_URL,
    RPC_TIMEOUT_MS,
];

const PROCESS_KEYS: &[&str] = &[
    ORCHESTRATOR_PROCESS,
    PHARMACIST_PROCESS,
    TRIAGE_PROCESS,
    USDA_PROCESS,
];

#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
    pub comment: Option<String>,
}

pub struct ConfigManager {
    env_file: PathBuf,
    config: HashMap<String, ConfigValue>,
}

impl ConfigManager {
    /// Load configuration from .env file
    pub fn load<P: AsRef<Path>>(env_file: P) -> Result<Self> {
        let env_file = env_file.as_ref().to_path_buf();

        if !env_file.exists() {
            return Err(anyhow!(".env file not found at {}", env_file.display()));
        }

        let content = fs::read_to_string(&env_file)
            .context("Failed to read .env file")?;

        Ok(Self {
            env_file,
            config: parse_env(&content),
        })
    }

    /// Load the file if it exists, otherwise start an empty configuration at that path
    pub fn load_or_default<P: AsRef<Path>>(env_file: P) -> Result<Self> {
        let env_file = env_file.as_ref();
        if env_file.exists() {
            Self::load(env_file)
        } else {
            Ok(Self {
                env_file: env_file.to_path_buf(),
                config: HashMap::new(),
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.env_file
    }

    /// Save configuration to .env file, keeping comments and key order
    pub fn save(&self) -> Result<()> {
        let mut lines = Vec::new();
        let mut written = Vec::new();

        let original = if self.env_file.exists() {
            fs::read_to_string(&self.env_file)?
        } else {
            String::new()
        };

        for line in original.lines() {
            let line_trimmed = line.trim();

            if line_trimmed.starts_with('#') || line_trimmed.is_empty() {
                lines.push(line.to_string());
            } else if let Some((key, _)) = line_trimmed.split_once('=') {
                let key = key.trim();
                if let Some(value) = self.config.get(key) {
                    lines.push(format!("{}={}", key, value.value));
                    written.push(key.to_string());
                } else {
                    lines.push(line.to_string());
                }
            }
        }

        // Keys set since the file was read go at the end
        for key in self.keys() {
            if written.contains(&key) {
                continue;
            }
            if let Some(value) = self.config.get(&key) {
                if let Some(comment) = &value.comment {
                    lines.push(format!("# {}", comment));
                }
                lines.push(format!("{}={}", key, value.value));
            }
        }

        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&self.env_file, content)
            .context("Failed to write .env file")?;

        Ok(())
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(|v| v.value.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Set a configuration value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();

        if let Some(existing) = self.config.get_mut(&key) {
            existing.value = value;
        } else {
            self.config.insert(
                key.clone(),
                ConfigValue {
                    key: key.clone(),
                    value,
                    comment: None,
                },
            );
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Vec<String> {
        validate_lookup(|key| self.get(key).map(|v| v.to_string()))
    }

    /// Get all configuration keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Network settings from this file alone
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig::from_lookup(|key| self.get(key).map(|v| v.to_string()))
    }
}

fn parse_env(content: &str) -> HashMap<String, ConfigValue> {
    let mut config = HashMap::new();
    let mut current_comment = None;

    for line in content.lines() {
        let line = line.trim();

        if line.starts_with('#') {
            current_comment = Some(line.trim_start_matches('#').trim().to_string());
            continue;
        }

        if line.is_empty() {
            current_comment = None;
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().trim_matches('"').to_string();

            config.insert(
                key.clone(),
                ConfigValue {
                    key,
                    value,
                    comment: current_comment.take(),
                },
            );
        }
    }

    config
}

/// Problems with a set of settings; empty when everything checks out
pub fn validate_lookup<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    if lookup(ORCHESTRATOR_PROCESS).is_none() {
        errors.push(format!("{} is not set", ORCHESTRATOR_PROCESS));
    }

    for &key in PROCESS_KEYS {
        if let Some(id) = lookup(key) {
            if !is_valid_process_id(&id) {
                errors.push(format!(
                    "{} must be a 43 character base64url process id",
                    key
                ));
            }
        }
    }

    for key in [MU_URL, CU_URL, HYPERBEAM_URL] {
        if let Some(url) = lookup(key) {
            if !is_valid_url(&url) {
                errors.push(format!("Invalid URL for {}: {}", key, url));
            }
        }
    }

    for key in [MESSAGE_POLLING_RATE, RPC_TIMEOUT_MS] {
        if let Some(value) = lookup(key) {
            if !matches!(value.parse::<u64>(), Ok(ms) if ms > 0) {
                errors.push(format!("{} must be a positive number of milliseconds", key));
            }
        }
    }

    errors
}

/// Resolved network settings
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub development: bool,
    pub mu_url: String,
    pub cu_url: String,
    pub orchestrator_process: Option<String>,
    pub pharmacist_process: Option<String>,
    pub triage_process: Option<String>,
    pub usda_process: Option<String>,
    pub message_polling_rate: Duration,
    pub hyperbeam_url: String,
    pub rpc_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl NetworkConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let development = lookup(ENVIRONMENT)
            .map(|env| env.eq_ignore_ascii_case("DEVELOPMENT"))
            .unwrap_or(false);

        let (default_mu, default_cu) = if development {
            (DEV_MU_URL, DEV_CU_URL)
        } else {
            (DEFAULT_MU_URL, DEFAULT_CU_URL)
        };

        let millis = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(default))
        };

        Self {
            development,
            mu_url: lookup(MU_URL).unwrap_or_else(|| default_mu.to_string()),
            cu_url: lookup(CU_URL).unwrap_or_else(|| default_cu.to_string()),
            orchestrator_process: lookup(ORCHESTRATOR_PROCESS),
            pharmacist_process: lookup(PHARMACIST_PROCESS),
            triage_process: lookup(TRIAGE_PROCESS),
            usda_process: lookup(USDA_PROCESS),
            message_polling_rate: millis(MESSAGE_POLLING_RATE, DEFAULT_MESSAGE_POLLING_RATE_MS),
            hyperbeam_url: lookup(HYPERBEAM_URL).unwrap_or_else(|| DEFAULT_HYPERBEAM_URL.to_string()),
            rpc_timeout: millis(RPC_TIMEOUT_MS, DEFAULT_RPC_TIMEOUT.as_millis() as u64),
        }
    }

    pub fn orchestrator(&self) -> Result<&str> {
        self.orchestrator_process
            .as_deref()
            .ok_or_else(|| anyhow!("Orchestrator process ID not configured"))
    }

    pub fn pharmacist(&self) -> Result<&str> {
        self.pharmacist_process
            .as_deref()
            .ok_or_else(|| anyhow!("Pharmacist process ID not configured"))
    }

    pub fn usda(&self) -> Result<&str> {
        self.usda_process
            .as_deref()
            .ok_or_else(|| anyhow!("USDA token process ID not configured"))
    }

    /// Triage agent process; empty when unset
    pub fn triage(&self) -> &str {
        self.triage_process.as_deref().unwrap_or("")
    }
}
