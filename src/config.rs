use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::collectors::classify::OTHER_CATEGORY;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub processes: ProcessConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(default = "default_cpu_window_ms")]
    pub cpu_window_ms: u64,
    #[serde(default = "default_per_core_window_ms")]
    pub per_core_window_ms: u64,
    #[serde(default = "default_process_window_ms")]
    pub process_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    #[serde(default = "default_process_limit")]
    pub default_limit: usize,
    #[serde(default = "default_overview_limit")]
    pub overview_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServicesConfig {
    #[serde(default = "default_systemctl_path")]
    pub systemctl_path: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Replaces the built-in keyword table when present. Order matters: the
    /// first rule whose keyword matches wins.
    #[serde(default)]
    pub categories: Option<Vec<CategoryRuleConfig>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryRuleConfig {
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cpu_window_ms: default_cpu_window_ms(),
            per_core_window_ms: default_per_core_window_ms(),
            process_window_ms: default_process_window_ms(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_limit: default_process_limit(),
            overview_limit: default_overview_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            systemctl_path: default_systemctl_path(),
            command_timeout_ms: default_command_timeout_ms(),
            categories: None,
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
    #[error("invalid configuration: {0}")]
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
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port socket address".to_string(),
            ));
        }
        if self.request_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be >= 1".to_string(),
            ));
        }

        validate_sampling(&self.sampling)?;
        validate_processes(&self.processes)?;
        validate_services(&self.services)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_sampling(cfg: &SamplingConfig) -> Result<(), ConfigError> {
    if cfg.cpu_window_ms < 1 || cfg.cpu_window_ms > 10_000 {
        return Err(ConfigError::Validation(
            "sampling.cpu_window_ms must be in range 1..=10000".to_string(),
        ));
    }
    if cfg.per_core_window_ms < 1 {
        return Err(ConfigError::Validation(
            "sampling.per_core_window_ms must be >= 1".to_string(),
        ));
    }
    if cfg.process_window_ms < 1 {
        return Err(ConfigError::Validation(
            "sampling.process_window_ms must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_processes(cfg: &ProcessConfig) -> Result<(), ConfigError> {
    if cfg.default_limit < 1 || cfg.overview_limit < 1 {
        return Err(ConfigError::Validation(
            "processes.default_limit and processes.overview_limit must be >= 1".to_string(),
        ));
    }
    if cfg.default_limit > cfg.max_limit {
        return Err(ConfigError::Validation(format!(
            "processes.default_limit ({}) must not exceed processes.max_limit ({})",
            cfg.default_limit, cfg.max_limit
        )));
    }
    Ok(())
}

fn validate_services(cfg: &ServicesConfig) -> Result<(), ConfigError> {
    if cfg.systemctl_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "services.systemctl_path must not be empty".to_string(),
        ));
    }
    if cfg.command_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "services.command_timeout_ms must be >= 1".to_string(),
        ));
    }

    let Some(rules) = &cfg.categories else {
        return Ok(());
    };
    let mut names = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services.categories[*].name must not be empty".to_string(),
            ));
        }
        if rule.name == OTHER_CATEGORY {
            return Err(ConfigError::Validation(format!(
                "category name '{OTHER_CATEGORY}' is reserved for unmatched units"
            )));
        }
        if !names.insert(rule.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "category '{}' must be unique",
                rule.name
            )));
        }
        if rule.keywords.is_empty() || rule.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "category '{}' needs at least one keyword and no empty keywords",
                rule.name
            )));
        }
    }
    Ok(())
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_cpu_window_ms() -> u64 {
    1000
}

const fn default_per_core_window_ms() -> u64 {
    100
}

const fn default_process_window_ms() -> u64 {
    200
}

const fn default_process_limit() -> usize {
    10
}

const fn default_overview_limit() -> usize {
    5
}

const fn default_max_limit() -> usize {
    100
}

const fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_systemctl_path() -> String {
    "systemctl".to_string()
}
