//! Configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Target device class configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB Vendor ID
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    /// Case-insensitive substring of the USB product name
    #[serde(default = "default_name_marker")]
    pub name_marker: String,
    /// Extra product IDs that match regardless of name
    #[serde(default)]
    pub product_ids: Vec<u16>,
}

fn default_vendor_id() -> u16 {
    crate::usb::APPLE_VENDOR_ID
}
fn default_name_marker() -> String {
    crate::usb::IPAD_NAME_MARKER.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            name_marker: default_name_marker(),
            product_ids: Vec::new(),
        }
    }
}

/// SidecarLauncher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Explicit path to the SidecarLauncher executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Marker that identifies the iPad line in `devices` output
    #[serde(default = "default_device_marker")]
    pub device_marker: String,
    /// Attempts for the `devices` listing before giving up
    #[serde(default = "default_list_retries")]
    pub list_retries: u32,
    /// Delay between listing attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Upper bound on any single launcher invocation in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_device_marker() -> String {
    "iPad".to_string()
}
fn default_list_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2000
}
fn default_command_timeout() -> u64 {
    30_000
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            path: None,
            device_marker: default_device_marker(),
            list_retries: default_list_retries(),
            retry_delay_ms: default_retry_delay(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

/// Activation policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Minimum time between activation attempts in milliseconds
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// Wait after an attach before activating, in milliseconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Consecutive failures before attempts stop until the device is unplugged
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_debounce() -> u64 {
    5000
}
fn default_settle_delay() -> u64 {
    2000
}
fn default_max_failures() -> u32 {
    3
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            settle_delay_ms: default_settle_delay(),
            max_failures: default_max_failures(),
        }
    }
}

/// Background monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// USB polling interval in milliseconds (platforms without native hotplug)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Sidecar status probe interval in seconds (0 disables)
    #[serde(default = "default_status_poll")]
    pub status_poll_secs: u64,
    /// Clock gap treated as a sleep/wake cycle, in seconds
    #[serde(default = "default_resume_gap")]
    pub resume_gap_secs: u64,
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_status_poll() -> u64 {
    10
}
fn default_resume_gap() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            status_poll_secs: default_status_poll(),
            resume_gap_secs: default_resume_gap(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target device class
    #[serde(default)]
    pub device: DeviceConfig,
    /// SidecarLauncher invocation
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Activation policy
    #[serde(default)]
    pub activation: ActivationConfig,
    /// Hotplug, status and power monitoring
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file, falling back to defaults if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Directory holding the config and preference files
    pub fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "autosidecar", "AutoSidecar")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the default configuration embedded in the binary
    pub fn default_config_str() -> &'static str {
        include_str!("../../config/default.toml")
    }
}

impl LauncherConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl ActivationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
