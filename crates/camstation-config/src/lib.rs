//! Configuration for camstation.
//!
//! TOML settings merged with `CAMSTATION_` environment variables,
//! credential resolution (env + keyring + plaintext) and the flat device
//! record store. Translates everything into the types `camstation-core`
//! consumes: [`StationConfig`], [`TransportConfig`], a
//! [`CredentialSource`](camstation_core::CredentialSource) and a
//! [`DeviceRepository`](camstation_core::DeviceRepository).

pub mod credentials;
pub mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use camstation_core::{
    BackoffPolicy, PoolConfig, StationConfig, StreamConfig, TlsMode, TransportConfig,
};

pub use credentials::{CredentialEntry, KeyringCredentials};
pub use store::TomlDeviceStore;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for '{reference}'")]
    NoCredentials { reference: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

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

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub streaming: Streaming,

    #[serde(default)]
    pub health: Health,

    /// Credentials keyed by the reference devices carry.
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialEntry>,

    /// Device record file. Defaults to `devices.toml` in the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices_file: Option<PathBuf>,
}

/// Output and transport defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Accept self-signed device certificates.
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Custom CA for devices with real certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            insecure: default_insecure(),
            ca_cert: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_insecure() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    10
}

/// Stream Manager settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Streaming {
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,

    #[serde(default = "default_frame_buffer_depth")]
    pub frame_buffer_depth: usize,

    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Seconds without a frame before a stream counts as stalled.
    #[serde(default = "default_five")]
    pub liveness_timeout: u64,

    /// Seconds.
    #[serde(default = "default_five")]
    pub open_timeout: u64,

    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for Streaming {
    fn default() -> Self {
        Self {
            max_streams: default_max_streams(),
            frame_buffer_depth: default_frame_buffer_depth(),
            event_channel_capacity: default_event_capacity(),
            liveness_timeout: default_five(),
            open_timeout: default_five(),
            max_consecutive_failures: default_max_failures(),
            backoff: Backoff::default(),
        }
    }
}

fn default_max_streams() -> usize {
    16
}
fn default_frame_buffer_depth() -> usize {
    2
}
fn default_event_capacity() -> usize {
    256
}
fn default_five() -> u64 {
    5
}
fn default_max_failures() -> u32 {
    5
}

/// Device health-probe settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Health {
    /// Seconds between probes while a device is in use.
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u64,

    #[serde(default = "default_failures_at_cap")]
    pub failures_at_cap_before_offline: u32,

    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            failures_at_cap_before_offline: default_failures_at_cap(),
            backoff: Backoff::default(),
        }
    }
}

fn default_probe_interval() -> u64 {
    30
}
fn default_failures_at_cap() -> u32 {
    3
}

/// Exponential backoff, in TOML-friendly units.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Backoff {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default = "default_cap_secs")]
    pub cap_secs: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            factor: default_factor(),
            cap_secs: default_cap_secs(),
            jitter: default_jitter(),
        }
    }
}

fn default_base_ms() -> u64 {
    1000
}
fn default_factor() -> f64 {
    2.0
}
fn default_cap_secs() -> u64 {
    60
}
fn default_jitter() -> f64 {
    0.2
}

impl From<Backoff> for BackoffPolicy {
    fn from(b: Backoff) -> Self {
        Self {
            base: Duration::from_millis(b.base_ms),
            factor: b.factor,
            cap: Duration::from_secs(b.cap_secs),
            jitter: b.jitter,
        }
    }
}

// ── Translation to core types ───────────────────────────────────────

impl Config {
    /// Build the core's runtime tuning, rejecting unusable values.
    pub fn station_config(&self) -> Result<StationConfig, ConfigError> {
        let config = StationConfig {
            max_streams: self.streaming.max_streams,
            frame_buffer_depth: self.streaming.frame_buffer_depth,
            event_channel_capacity: self.streaming.event_channel_capacity,
            pool: PoolConfig {
                connect_timeout: Duration::from_secs(self.defaults.connect_timeout),
                request_timeout: Duration::from_secs(self.defaults.request_timeout),
                probe_interval: Duration::from_secs(self.health.probe_interval),
                backoff: self.health.backoff.into(),
                failures_at_cap_before_offline: self.health.failures_at_cap_before_offline,
            },
            stream: StreamConfig {
                liveness_timeout: Duration::from_secs(self.streaming.liveness_timeout),
                open_timeout: Duration::from_secs(self.streaming.open_timeout),
                max_consecutive_failures: self.streaming.max_consecutive_failures,
                backoff: self.streaming.backoff.into(),
            },
        };
        config
            .validate()
            .map_err(|e| ConfigError::Validation {
                field: "streaming".into(),
                reason: e.to_string(),
            })?;
        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.defaults.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.defaults.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            connect_timeout: Duration::from_secs(self.defaults.connect_timeout),
            request_timeout: Duration::from_secs(self.defaults.request_timeout),
        }
    }

    /// Credential source over this config's entries, keyring included.
    pub fn credential_source(&self) -> KeyringCredentials {
        KeyringCredentials::new(self.credentials.clone())
    }

    pub fn devices_path(&self) -> PathBuf {
        self.devices_file.clone().unwrap_or_else(default_devices_path)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "camstation", "camstation")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where device records live unless the config says otherwise.
pub fn default_devices_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("devices.toml"),
        |dirs| dirs.data_dir().join("devices.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("camstation");
    p
}

// ── Loading & saving ────────────────────────────────────────────────

/// Load the config from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from a specific file. A missing file yields the defaults.
///
/// Environment overrides use `__` between sections, e.g.
/// `CAMSTATION_STREAMING__MAX_STREAMS=8`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CAMSTATION_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_core_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        let station = config.station_config().unwrap();
        let core = StationConfig::default();
        assert_eq!(station.max_streams, core.max_streams);
        assert_eq!(station.frame_buffer_depth, core.frame_buffer_depth);
        assert_eq!(station.pool.probe_interval, core.pool.probe_interval);
        assert_eq!(station.stream.backoff, core.stream.backoff);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
[streaming]
max_streams = 9
liveness_timeout = 3

[streaming.backoff]
base_ms = 250
cap_secs = 10

[health]
probe_interval = 15

[credentials.nvr]
username = "admin"
password_env = "NVR_PASSWORD"
"#,
        );
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.streaming.max_streams, 9);
        assert_eq!(config.streaming.frame_buffer_depth, 2);

        let station = config.station_config().unwrap();
        assert_eq!(station.stream.liveness_timeout, Duration::from_secs(3));
        assert_eq!(station.stream.backoff.base, Duration::from_millis(250));
        assert_eq!(station.stream.backoff.cap, Duration::from_secs(10));
        assert!((station.stream.backoff.factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(station.pool.probe_interval, Duration::from_secs(15));
        assert_eq!(
            config.credentials["nvr"].password_env.as_deref(),
            Some("NVR_PASSWORD")
        );
    }

    #[test]
    fn unusable_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[streaming]\nmax_streams = 0\n");
        let err = load_config_from(&path)
            .unwrap()
            .station_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn transport_prefers_insecure_then_custom_ca() {
        let mut config = Config::default();
        assert_eq!(config.transport_config().tls, TlsMode::DangerAcceptInvalid);

        config.defaults.insecure = false;
        assert_eq!(config.transport_config().tls, TlsMode::System);

        config.defaults.ca_cert = Some(PathBuf::from("/etc/nvr-ca.pem"));
        assert_eq!(
            config.transport_config().tls,
            TlsMode::CustomCa(PathBuf::from("/etc/nvr-ca.pem"))
        );
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.streaming.max_streams = 4;
        config.credentials.insert(
            "nvr".into(),
            CredentialEntry {
                username: "admin".into(),
                password: None,
                password_env: None,
            },
        );
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }
}
