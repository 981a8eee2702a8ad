// src/config.rs
//! Service configuration: remote file store credentials, heartbeat cadence
//! and aggregation tunables.
//!
//! Loaded from a TOML file resolved via `SOILWATCH_CONFIG`, falling back to
//! `config/soilwatch.toml`. The FTP password may be indirected through the
//! environment (`password = "ENV"` → `SOILWATCH_FTP_PASSWORD`) so the file
//! can be committed without secrets.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const ENV_CONFIG_PATH: &str = "SOILWATCH_CONFIG";
const ENV_FTP_PASSWORD: &str = "SOILWATCH_FTP_PASSWORD";
const DEFAULT_CONFIG_PATH: &str = "config/soilwatch.toml";

fn default_ftp_port() -> u16 {
    21
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_interval() -> u64 {
    300
}
fn default_rain_column() -> String {
    "Rain_mm_Tot".to_string()
}
fn default_rolling_window() -> usize {
    crate::aggregate::ROLLING_WINDOW_ROWS
}
fn default_stations_path() -> String {
    "config/stations.toml".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    pub user: String,
    /// "ENV" means: read from SOILWATCH_FTP_PASSWORD.
    #[serde(default)]
    pub password: String,
    /// Remote directory changed into before any retrieval.
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_rain_column")]
    pub rain_column: String,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            rain_column: default_rain_column(),
            rolling_window: default_rolling_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ftp: FtpConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default = "default_stations_path")]
    pub stations_path: String,
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config from {}", path.display()))?;
        cfg.resolve_secrets()?;
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $SOILWATCH_CONFIG
    /// 2) config/soilwatch.toml
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("SOILWATCH_CONFIG points to non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Err(anyhow!(
            "no configuration found; set SOILWATCH_CONFIG or provide {DEFAULT_CONFIG_PATH}"
        ))
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        if self.ftp.password.is_empty() || self.ftp.password == "ENV" {
            self.ftp.password = std::env::var(ENV_FTP_PASSWORD)
                .with_context(|| format!("{ENV_FTP_PASSWORD} not set and no password in config"))?;
        }
        Ok(())
    }
}
