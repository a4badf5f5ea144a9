//! Configuration for the sampler and the command-line tool.
//!
//! Values come from three layers: built-in defaults, an optional config file
//! (YAML, JSON or TOML, picked by extension) and CLI flags. Every field is
//! optional so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::cache::CachePolicy;
use crate::procfs::DEFAULT_PROC_ROOT;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_STALENESS_MS: u64 = 1000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_ENTRY_TTL_MS: u64 = 300_000;
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Config files probed when no path is given, in order.
pub const DEFAULT_CONFIG_LOCATIONS: [&str; 6] = [
    "/etc/herakles/proc-sampler.yaml",
    "/etc/herakles/proc-sampler.yml",
    "/etc/herakles/proc-sampler.json",
    "./herakles-proc-sampler.yaml",
    "./herakles-proc-sampler.yml",
    "./herakles-proc-sampler.json",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Sampling
    #[serde(alias = "staleness-ms")]
    pub staleness_ms: Option<u64>,
    pub workers: Option<usize>,
    #[serde(alias = "entry-ttl-ms")]
    pub entry_ttl_ms: Option<u64>,
    #[serde(alias = "max-entries")]
    pub max_entries: Option<usize>,
    #[serde(alias = "request-privileges")]
    pub request_privileges: Option<bool>,
    #[serde(alias = "proc-root")]
    pub proc_root: Option<PathBuf>,

    // Server configuration
    pub bind: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "tls-cert")]
    pub tls_cert: Option<PathBuf>,
    #[serde(alias = "tls-key")]
    pub tls_key: Option<PathBuf>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staleness_ms: Some(DEFAULT_STALENESS_MS),
            workers: Some(DEFAULT_WORKERS),
            entry_ttl_ms: Some(DEFAULT_ENTRY_TTL_MS),
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            request_privileges: Some(true),
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            tls_cert: None,
            tls_key: None,
            log_level: Some("info".into()),
        }
    }
}

/// Resolved settings the `Sampler` is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    pub cache: CachePolicy,
    pub workers: usize,
    pub request_privileges: bool,
    pub proc_root: PathBuf,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cache: CachePolicy {
                staleness_ms: DEFAULT_STALENESS_MS,
                entry_ttl_ms: DEFAULT_ENTRY_TTL_MS,
                max_entries: DEFAULT_MAX_ENTRIES,
            },
            workers: DEFAULT_WORKERS,
            request_privileges: true,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }
}

impl Config {
    /// Sampler settings with defaults filled in for unset fields.
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            cache: CachePolicy {
                staleness_ms: self.staleness_ms.unwrap_or(DEFAULT_STALENESS_MS),
                entry_ttl_ms: self.entry_ttl_ms.unwrap_or(DEFAULT_ENTRY_TTL_MS),
                max_entries: self.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
            },
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            request_privileges: self.request_privileges.unwrap_or(true),
            proc_root: self
                .proc_root
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT)),
        }
    }

    /// Fields set in `other` replace the ones in `self`.
    pub fn merge(mut self, other: Config) -> Config {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            staleness_ms,
            workers,
            entry_ttl_ms,
            max_entries,
            request_privileges,
            proc_root,
            bind,
            port,
            tls_cert,
            tls_key,
            log_level
        );
        self
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    let sampler = cfg.sampler_config();

    if sampler.cache.staleness_ms == 0 {
        return Err(ConfigError::Invalid("staleness_ms must be greater than 0".into()));
    }
    if sampler.workers == 0 {
        return Err(ConfigError::Invalid("workers must be at least 1".into()));
    }
    if sampler.cache.max_entries == 0 {
        return Err(ConfigError::Invalid("max_entries must be at least 1".into()));
    }
    if sampler.cache.entry_ttl_ms < sampler.cache.staleness_ms {
        return Err(ConfigError::Invalid(format!(
            "entry_ttl_ms ({}) must not be shorter than staleness_ms ({})",
            sampler.cache.entry_ttl_ms, sampler.cache.staleness_ms
        )));
    }

    if cfg.tls_cert.is_some() != cfg.tls_key.is_some() {
        return Err(ConfigError::Invalid(
            "tls_cert and tls_key must be set together".into(),
        ));
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(level, "off" | "error" | "warn" | "info" | "debug" | "trace") {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}', expected off, error, warn, info, debug or trace",
                level
            )));
        }
    }

    Ok(())
}

/// Load a config file, or the first existing default location when `path` is `None`.
///
/// Missing files yield `Config::default()`. Fields absent from the file keep
/// their defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let parse_err = |message: String| ConfigError::Parse {
        path: path.clone(),
        message,
    };

    let file_config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
    };
    info!("Loaded configuration from: {}", path.display());

    Ok(Config::default().merge(file_config))
}
