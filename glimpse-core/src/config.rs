use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Version component of the cache root directory name.
///
/// Bumping this invalidates every previously cached asset: the next
/// [`CacheRoot::open`](crate::cache::CacheRoot::open) sweeps the old root.
pub const CACHE_VERSION: &str = "v1";

/// Default prefix of the cache root directory name.
pub const CACHE_PREFIX: &str = "glimpse";

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache prefix must not be empty")]
    EmptyPrefix,
    #[error("cache prefix must not contain path separators: {0}")]
    InvalidPrefix(String),
    #[error("cache version must not be empty")]
    EmptyVersion,
    #[error("fetch timeout must be at least one second")]
    ZeroTimeout,
    #[error("max_concurrent_fetches must be at least 1")]
    ZeroPermits,
}

/// Settings for the on-disk asset cache and its fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory the versioned cache root is created in. Defaults to the OS
    /// temp directory.
    pub temp_root: Option<PathBuf>,
    /// Leading part of the cache root name; every `<prefix>-*` sibling of the
    /// current root is treated as a stale cache and removed at startup.
    pub prefix: String,
    pub version: String,
    /// Whole-request timeout for a single GET.
    pub fetch_timeout_secs: u64,
    /// Size of the fetch permit pool. Defaults to the logical CPU count.
    pub max_concurrent_fetches: Option<usize>,
    pub user_agent: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            prefix: CACHE_PREFIX.to_string(),
            version: CACHE_VERSION.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_concurrent_fetches: None,
            user_agent: None,
        }
    }
}

impl CacheConfig {
    /// Config rooted at `temp_root` instead of the OS temp directory.
    pub fn in_dir(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: Some(temp_root.into()),
            ..Self::default()
        }
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read cache config from {}", path.display())
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid cache config {}", path.display())
            })?,
            Some("toml") | Some("tml") => {
                toml::from_str(&contents).map_err(|err| {
                    anyhow!("invalid cache config {}: {}", path.display(), err)
                })?
            }
            _ => Self::parse_from_str(&contents, &path.display().to_string())?,
        };

        config.validate().with_context(|| {
            format!("invalid cache config {}", path.display())
        })?;
        Ok(config)
    }

    fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!(err))
    }

    fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        if let Ok(config) = Self::parse_json(contents) {
            return Ok(config);
        }
        toml::from_str(contents).map_err(|err| {
            anyhow!(
                "cache config {origin} is neither valid JSON nor TOML: {err}"
            )
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(ConfigError::InvalidPrefix(self.prefix.clone()));
        }
        if self.version.is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_concurrent_fetches == Some(0) {
            return Err(ConfigError::ZeroPermits);
        }
        Ok(())
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// `<prefix>-<version>`
    pub fn root_dir_name(&self) -> String {
        format!("{}-{}", self.prefix, self.version)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.temp_root().join(self.root_dir_name())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn fetch_permits(&self) -> usize {
        self.max_concurrent_fetches.unwrap_or_else(num_cpus::get).max(1)
    }
}
