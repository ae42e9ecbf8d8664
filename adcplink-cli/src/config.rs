//! Configuration file support for adcplink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ADCPLINK_*)
//! 3. Local config file (./adcplink.toml)
//! 4. Global config file (~/.config/adcplink/config.toml)

use adcplink::download::DownloadConfig;
use adcplink::protocol::commands::{COMMAND_TIMEOUT, DOWNLOAD_WAIT_STATE, WAIT_STATE};
use adcplink::LinkConfig;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "adcplink.toml";

/// Default TCP/UDP port of the instrument's network bridge.
pub const DEFAULT_NET_PORT: u16 = 55056;

/// Default serial baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport name ("serial", "tcp", "udp" or "ping").
    pub transport: Option<String>,
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Serial baud rate.
    pub baud: Option<u32>,
    /// Instrument address for network transports.
    pub host: Option<String>,
    /// TCP/UDP port.
    pub net_port: Option<u16>,
}

/// Timing overrides, all in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Command response timeout.
    pub command_timeout_ms: Option<u64>,
    /// Reader poll interval and break settle time.
    pub wait_state_ms: Option<u64>,
    /// Reader poll interval during downloads.
    pub download_wait_state_ms: Option<u64>,
}

/// Download configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Consecutive empty polls before a download ends.
    pub retry_budget: Option<u32>,
    /// Resend requests per chunk.
    pub resend_cap: Option<u32>,
    /// Send "restart" before every download.
    #[serde(default)]
    pub restart: bool,
    /// Directory downloads are written to when no output path is given.
    pub output_dir: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Download configuration.
    #[serde(default)]
    pub download: DownloadSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "adcplink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let conn = other.connection;
        if conn.transport.is_some() {
            self.connection.transport = conn.transport;
        }
        if conn.serial.is_some() {
            self.connection.serial = conn.serial;
        }
        if conn.baud.is_some() {
            self.connection.baud = conn.baud;
        }
        if conn.host.is_some() {
            self.connection.host = conn.host;
        }
        if conn.net_port.is_some() {
            self.connection.net_port = conn.net_port;
        }

        let timing = other.timing;
        if timing.command_timeout_ms.is_some() {
            self.timing.command_timeout_ms = timing.command_timeout_ms;
        }
        if timing.wait_state_ms.is_some() {
            self.timing.wait_state_ms = timing.wait_state_ms;
        }
        if timing.download_wait_state_ms.is_some() {
            self.timing.download_wait_state_ms = timing.download_wait_state_ms;
        }

        let download = other.download;
        if download.retry_budget.is_some() {
            self.download.retry_budget = download.retry_budget;
        }
        if download.resend_cap.is_some() {
            self.download.resend_cap = download.resend_cap;
        }
        if download.restart {
            self.download.restart = true;
        }
        if download.output_dir.is_some() {
            self.download.output_dir = download.output_dir;
        }
    }

    /// Command timeout, with `override_ms` taking precedence.
    pub fn command_timeout(&self, override_ms: Option<u64>) -> Duration {
        override_ms
            .or(self.timing.command_timeout_ms)
            .map_or(COMMAND_TIMEOUT, Duration::from_millis)
    }

    /// Link settings for stream transports.
    pub fn link_config(&self, timeout_override_ms: Option<u64>) -> LinkConfig {
        let mut link = LinkConfig::default()
            .with_command_timeout(self.command_timeout(timeout_override_ms))
            .with_wait_state(
                self.timing
                    .wait_state_ms
                    .map_or(WAIT_STATE, Duration::from_millis),
            );
        link.download_wait_state = self
            .timing
            .download_wait_state_ms
            .map_or(DOWNLOAD_WAIT_STATE, Duration::from_millis);
        link
    }

    /// Download engine settings; `restart` forces a restart request.
    pub fn download_config(&self, restart: bool) -> DownloadConfig {
        let defaults = DownloadConfig::default();
        DownloadConfig {
            retry_budget: self.download.retry_budget.unwrap_or(defaults.retry_budget),
            resend_cap: self.download.resend_cap.unwrap_or(defaults.resend_cap),
            restart_before_download: restart || self.download.restart,
            ..defaults
        }
    }
}
