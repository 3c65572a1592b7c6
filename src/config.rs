use crate::thresholds::{self, ThresholdRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub glances: GlancesConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default = "default_thresholds_path")]
    pub thresholds_path: String,
    /// Seed rules used on first run, before anything was persisted.
    #[serde(default)]
    pub thresholds: Option<BTreeMap<String, ThresholdRule>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlancesConfig {
    #[serde(default = "default_glances_base_url")]
    pub base_url: String,
    #[serde(default = "default_glances_api_version")]
    pub api_version: u8,
    #[serde(default = "default_glances_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub push_url: Option<String>,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for GlancesConfig {
    fn default() -> Self {
        Self {
            base_url: default_glances_base_url(),
            api_version: default_glances_api_version(),
            timeout_ms: default_glances_timeout_ms(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            push_url: None,
            timeout_ms: default_heartbeat_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }

        validate_glances(&self.glances)?;
        validate_heartbeat(&self.heartbeat)?;

        if let Some(rules) = &self.thresholds {
            thresholds::validate_rules(rules)
                .map_err(|err| ConfigError::Validation(err.to_string()))?;
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_glances(cfg: &GlancesConfig) -> Result<(), ConfigError> {
    if !cfg.base_url.starts_with("http://") && !cfg.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "glances.base_url must start with http:// or https://".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "glances.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_heartbeat(cfg: &HeartbeatConfig) -> Result<(), ConfigError> {
    if cfg.enabled {
        let push_url = cfg
            .push_url
            .as_ref()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());
        match push_url {
            Some(url) => {
                if reqwest::Url::parse(url).is_err() {
                    return Err(ConfigError::Validation(
                        "heartbeat.push_url must be a valid URL".to_string(),
                    ));
                }
            }
            None => {
                return Err(ConfigError::Validation(
                    "heartbeat.push_url is required when heartbeat.enabled is true".to_string(),
                ));
            }
        }
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "heartbeat.timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.retry_base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "heartbeat.retry_base_delay_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:8765".to_string()
}

const fn default_interval_secs() -> u64 {
    30
}

fn default_glances_base_url() -> String {
    "http://127.0.0.1:61208".to_string()
}

const fn default_glances_api_version() -> u8 {
    4
}

const fn default_glances_timeout_ms() -> u64 {
    5000
}

fn default_thresholds_path() -> String {
    "./thresholds.yaml".to_string()
}

const fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    500
}
