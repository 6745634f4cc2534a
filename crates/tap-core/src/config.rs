//! Configuration system for tap.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TAP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tap/config.toml
//!   3. ~/.config/tap/config.toml

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{DEFAULT_LINGER_MS, DEFAULT_MAIN_SERVER, DEFAULT_WAKE_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub network: NetworkConfig,
    pub capture: CaptureConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address of the main game server. Everything else is a bulle.
    pub main_server: IpAddr,
    /// Addresses monitored from start-up. Empty = the main server only.
    pub watch: Vec<IpAddr>,
    /// How long a closing connection keeps its local port, in milliseconds.
    pub linger_ms: u64,
    /// UDP port poked on close to unblock a parked capture receive.
    pub wake_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// libpcap, passive. Requires the `pcap` feature.
    Pcap,
    /// No live capture; useful for dry runs of the configuration.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: BackendKind,
    /// Capture device name. Empty = auto-detect.
    pub interface: String,
    pub snaplen: i32,
    /// Receive timeout; bounds how long a closed driver can stay parked.
    pub timeout_ms: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Log every framed packet at trace level.
    pub trace_packets: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            main_server: DEFAULT_MAIN_SERVER,
            watch: Vec::new(),
            linger_ms: DEFAULT_LINGER_MS,
            wake_port: DEFAULT_WAKE_PORT,
        }
    }
}

/// Live capture when the daemon is built with it, otherwise none.
impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "pcap") {
            BackendKind::Pcap
        } else {
            BackendKind::None
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            interface: String::new(),
            snaplen: 65535,
            timeout_ms: 500,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            trace_packets: false,
        }
    }
}

impl NetworkConfig {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    /// Start-up watch list, never empty.
    pub fn initial_watch(&self) -> Vec<IpAddr> {
        if self.watch.is_empty() {
            vec![self.main_server]
        } else {
            self.watch.clone()
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tap")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TapConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TapConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TapConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TAP_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TAP_NETWORK__MAIN_SERVER") {
            if let Ok(ip) = v.parse() {
                self.network.main_server = ip;
            }
        }
        if let Some(v) = lookup("TAP_NETWORK__LINGER_MS") {
            if let Ok(ms) = v.parse() {
                self.network.linger_ms = ms;
            }
        }
        if let Some(v) = lookup("TAP_NETWORK__WAKE_PORT") {
            if let Ok(p) = v.parse() {
                self.network.wake_port = p;
            }
        }
        if let Some(v) = lookup("TAP_CAPTURE__BACKEND") {
            match v.as_str() {
                "pcap" => self.capture.backend = BackendKind::Pcap,
                "none" => self.capture.backend = BackendKind::None,
                _ => {}
            }
        }
        if let Some(v) = lookup("TAP_CAPTURE__INTERFACE") {
            self.capture.interface = v;
        }
        if let Some(v) = lookup("TAP_DISPATCH__TRACE_PACKETS") {
            self.dispatch.trace_packets = v == "true" || v == "1";
        }
    }
}
