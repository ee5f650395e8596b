//! Configuration for shellyscan.
//!
//! TOML file + `SHELLYSCAN_` environment overrides, and translation to
//! `shellyscan_core::EngineConfig`. The core never reads files itself.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shellyscan_core::{DEFAULT_PORT, EngineConfig, ScanMode, TransportConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanModeSetting {
    #[default]
    Mdns,
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScanSettings {
    #[serde(default)]
    pub mode: ScanModeSetting,

    /// Network prefix for range mode (e.g. "192.168.1.0").
    pub base_ip: Option<String>,

    #[serde(default = "default_first")]
    pub first: u8,

    #[serde(default = "default_last")]
    pub last: u8,

    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: ScanModeSetting::default(),
            base_ip: None,
            first: default_first(),
            last: default_last(),
            probe_port: default_probe_port(),
        }
    }
}

fn default_first() -> u8 {
    1
}
fn default_last() -> u8 {
    254
}
fn default_probe_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefreshSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Every N-th poll re-reads the settings too.
    #[serde(default = "default_full_refresh_ticks")]
    pub full_refresh_ticks: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            full_refresh_ticks: default_full_refresh_ticks(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}
fn default_full_refresh_ticks() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreSettings {
    /// Ghost store file; defaults to the platform data directory.
    pub path: Option<PathBuf>,

    /// Re-probe ghosts this long after startup (0 disables).
    #[serde(default = "default_auto_reconnect_secs")]
    pub auto_reconnect_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            auto_reconnect_secs: default_auto_reconnect_secs(),
        }
    }
}

fn default_auto_reconnect_secs() -> u64 {
    45
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportSettings {
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            max_connections_per_host: default_max_connections_per_host(),
        }
    }
}

fn default_probe_timeout_secs() -> u64 {
    20
}
fn default_liveness_timeout_secs() -> u64 {
    30
}
fn default_max_connections_per_host() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_extender_probe")]
    pub extender_probe: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            extender_probe: default_extender_probe(),
        }
    }
}

fn default_extender_probe() -> bool {
    true
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("it", "usna", "shellyscan")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("shellyscan");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default ghost store location.
pub fn default_store_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("ghosts.json"),
        |dirs| dirs.data_dir().join("ghosts.json"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SHELLYSCAN_").split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is fine.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment(path).extract()?)
}

// ── Saving ──────────────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    fn scan_mode(&self) -> Result<ScanMode, ConfigError> {
        match self.scan.mode {
            ScanModeSetting::Mdns => Ok(ScanMode::Mdns),
            ScanModeSetting::Range => {
                let raw = self
                    .scan
                    .base_ip
                    .as_deref()
                    .ok_or_else(|| invalid("scan.base_ip", "required in range mode"))?;
                let base: Ipv4Addr = raw
                    .parse()
                    .map_err(|_| invalid("scan.base_ip", format!("not an IPv4 address: {raw}")))?;
                if self.scan.first > self.scan.last {
                    return Err(invalid(
                        "scan.first",
                        format!("{} is after scan.last ({})", self.scan.first, self.scan.last),
                    ));
                }
                Ok(ScanMode::Range {
                    base,
                    first: self.scan.first,
                    last: self.scan.last,
                })
            }
        }
    }

    /// Build the engine configuration, validating as we go.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if self.refresh.interval_ms == 0 {
            return Err(invalid("refresh.interval_ms", "must be greater than zero"));
        }
        if self.refresh.full_refresh_ticks == 0 {
            return Err(invalid("refresh.full_refresh_ticks", "must be greater than zero"));
        }
        if self.transport.probe_timeout_secs == 0 {
            return Err(invalid("transport.probe_timeout_secs", "must be greater than zero"));
        }

        let defaults = EngineConfig::default();
        Ok(EngineConfig {
            scan: self.scan_mode()?,
            probe_port: self.scan.probe_port,
            refresh_interval: Duration::from_millis(self.refresh.interval_ms),
            full_refresh_ticks: self.refresh.full_refresh_ticks,
            liveness_timeout: Duration::from_secs(self.transport.liveness_timeout_secs),
            store_path: Some(self.store.path.clone().unwrap_or_else(default_store_path)),
            auto_reconnect: (self.store.auto_reconnect_secs > 0)
                .then(|| Duration::from_secs(self.store.auto_reconnect_secs)),
            extender_probe: self.discovery.extender_probe,
            transport: TransportConfig {
                probe_timeout: Duration::from_secs(self.transport.probe_timeout_secs),
                max_connections_per_host: self.transport.max_connections_per_host.max(1),
                ..TransportConfig::default()
            },
            ..defaults
        })
    }
}
