//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use gpslog_core::EngineConfig;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file; defaults to the platform data directory
    pub db_path: Option<PathBuf>,

    /// Records older than this many hours are purged at startup (0 disables)
    pub retention_hours: u64,

    /// Minimum distance in meters between recorded fixes
    pub min_distance_m: f64,

    /// Fixes at the same spot this close in time are duplicates
    pub dedup_tolerance_secs: u64,

    /// Show writes before the store acknowledges them
    pub include_pending_writes: bool,

    /// Keep a GeoJSON map of the recorded locations at this path
    pub geojson_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            retention_hours: 24,
            min_distance_m: 100.0,
            dedup_tolerance_secs: 5,
            include_pending_writes: true,
            geojson_path: None,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gpslog")
            .join("config.toml")
    }

    /// Load config from `path`, or return default if not found
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => warn!("Failed to parse config {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to read config {}: {}", path.display(), e),
        }
        Self::default()
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Engine settings derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        let retention = (self.retention_hours > 0).then(|| hours(self.retention_hours));
        EngineConfig::default()
            .include_local_pending_writes(self.include_pending_writes)
            .retention(retention)
            .dedup_tolerance(seconds(self.dedup_tolerance_secs))
            .min_distance_m(self.min_distance_m)
    }
}

fn seconds(secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Whole hours as a duration, saturating instead of overflowing.
pub fn hours(hours: u64) -> time::Duration {
    seconds(hours.saturating_mul(3600))
}

/// Resolve the database path: command line, then config, then the default.
pub fn resolve_db_path(arg: Option<&Path>, config: &Config) -> PathBuf {
    arg.map(Path::to_path_buf)
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(gpslog_store::default_db_path)
}

/// Resolve the config file path: command line, then the default.
pub fn resolve_config_path(arg: Option<&Path>) -> PathBuf {
    arg.map(Path::to_path_buf).unwrap_or_else(Config::path)
}
