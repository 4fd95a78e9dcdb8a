//! SidecarLauncher client
//!
//! Wraps the external `SidecarLauncher` executable:
//!
//! ```text
//! SidecarLauncher devices              list reachable Sidecar devices, one per line
//! SidecarLauncher connect <name>       start Sidecar on the named device
//! SidecarLauncher disconnect <name>    stop Sidecar on the named device
//! SidecarLauncher status               free-text connection status
//! ```
//!
//! Outcomes are encoded in the exit code (see [`ExitKind`]) plus free text.
//! Device enumeration is racy right after the iPad is plugged in, so only the
//! listing step retries; `connect` runs once and its failure is reported to
//! the caller, whose own failure accounting decides what happens next.

use super::error::{ExitKind, LauncherError};
use super::runner::{CommandOutput, CommandRunner, ProcessRunner};
use crate::core::config::LauncherConfig;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result type for launcher operations
pub type Result<T> = std::result::Result<T, LauncherError>;

/// Launcher subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Devices,
    Connect,
    Disconnect,
    Status,
}

impl Subcommand {
    fn as_str(self) -> &'static str {
        match self {
            Subcommand::Devices => "devices",
            Subcommand::Connect => "connect",
            Subcommand::Disconnect => "disconnect",
            Subcommand::Status => "status",
        }
    }
}

/// Tunables for launcher invocations
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Marker that identifies the iPad line in `devices` output
    pub device_marker: String,
    /// Listing attempts used by [`SidecarLauncher::activate`]
    pub list_retries: u32,
    /// Pause between listing attempts
    pub retry_delay: Duration,
    /// Upper bound on a single invocation
    pub command_timeout: Duration,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self::from(&LauncherConfig::default())
    }
}

impl From<&LauncherConfig> for LauncherSettings {
    fn from(config: &LauncherConfig) -> Self {
        Self {
            device_marker: config.device_marker.clone(),
            list_retries: config.list_retries,
            retry_delay: config.retry_delay(),
            command_timeout: config.command_timeout(),
        }
    }
}

/// Successful activation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Sidecar was started
    Connected,
    /// Sidecar was already running for the device
    AlreadyActive,
}

/// Client for the SidecarLauncher executable
pub struct SidecarLauncher<R = ProcessRunner> {
    path: PathBuf,
    runner: R,
    settings: LauncherSettings,
    /// Last device name resolved by a listing, reused for disconnect
    cached_device: Mutex<Option<String>>,
}

impl SidecarLauncher<ProcessRunner> {
    /// Launcher that spawns real processes
    pub fn new(path: PathBuf, settings: LauncherSettings) -> Self {
        Self::with_runner(path, settings, ProcessRunner)
    }
}

impl<R: CommandRunner> SidecarLauncher<R> {
    pub fn with_runner(path: PathBuf, settings: LauncherSettings, runner: R) -> Self {
        Self {
            path,
            runner,
            settings,
            cached_device: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Device name remembered from the last successful listing
    pub fn cached_device_name(&self) -> Option<String> {
        self.cached_device.lock().clone()
    }

    /// Run one subcommand with the existence check and timeout applied
    async fn invoke(&self, subcommand: Subcommand, device: Option<&str>) -> Result<CommandOutput> {
        if !self.path.exists() {
            return Err(LauncherError::ExecutableNotFound {
                path: self.path.clone(),
            });
        }

        let mut args = vec![subcommand.as_str()];
        args.extend(device);

        let timeout = self.settings.command_timeout;
        let output = match tokio::time::timeout(timeout, self.runner.run(&self.path, &args)).await
        {
            Err(_) => {
                return Err(LauncherError::TimedOut {
                    subcommand: subcommand.as_str(),
                    after: timeout,
                })
            }
            Ok(Err(source)) => {
                return Err(LauncherError::ProcessLaunchFailed {
                    subcommand: subcommand.as_str(),
                    source,
                })
            }
            Ok(Ok(output)) => output,
        };

        if subcommand == Subcommand::Status {
            debug!("SidecarLauncher status exit code: {:?}", output.code);
        } else {
            info!(
                "SidecarLauncher {} exit code: {:?}",
                subcommand.as_str(),
                output.code
            );
            if !output.output.trim().is_empty() {
                info!(
                    "SidecarLauncher {} output:\n{}",
                    subcommand.as_str(),
                    output.output.trim_end()
                );
            }
        }

        Ok(output)
    }

    /// Find the iPad in the launcher's device list
    ///
    /// Exit codes 2 and 4, launch failures, timeouts and listings without an
    /// iPad line each consume one of `max_retries` attempts (at least one is
    /// always made), with [`LauncherSettings::retry_delay`] between attempts.
    pub async fn list_devices(&self, max_retries: u32) -> Result<String> {
        let attempts = max_retries.max(1);

        for attempt in 1..=attempts {
            info!(
                "Listing Sidecar devices (attempt {}/{})...",
                attempt, attempts
            );

            match self.invoke(Subcommand::Devices, None).await {
                Err(e @ LauncherError::ExecutableNotFound { .. }) => return Err(e),
                Err(e) => error!("{}", e),
                Ok(output) => match ExitKind::from_code(output.code) {
                    ExitKind::NoReachableDevices => {
                        warn!("No reachable Sidecar devices (exit code 2)");
                        if attempt == 1 {
                            log_unreachable_hints();
                        }
                    }
                    ExitKind::PlatformError => {
                        warn!("SidecarCore private error encountered (exit code 4)");
                        if attempt == 1 {
                            log_platform_error_hints();
                        }
                    }
                    _ => match find_device_line(&output.output, &self.settings.device_marker) {
                        Some(name) => {
                            info!("Found iPad via SidecarLauncher: {}", name);
                            return Ok(name);
                        }
                        None => {
                            warn!("No iPad found in device list output");
                            for line in non_empty_lines(&output.output) {
                                info!("  available: {}", line);
                            }
                        }
                    },
                },
            }

            if attempt < attempts {
                info!(
                    "Waiting {:?} before retry...",
                    self.settings.retry_delay
                );
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        Err(LauncherError::NoDeviceFound { attempts })
    }

    /// Start Sidecar on `device`
    ///
    /// A non-zero exit whose output says the device is already in use means
    /// Sidecar is running, which is what activation wants.
    pub async fn connect(&self, device: &str) -> Result<ConnectOutcome> {
        info!("Connecting to {}...", device);
        let output = self.invoke(Subcommand::Connect, Some(device)).await?;

        match ExitKind::from_code(output.code) {
            ExitKind::Success => {
                info!("Sidecar connected successfully");
                Ok(ConnectOutcome::Connected)
            }
            _ if is_already_active(&output.output) => {
                info!("Sidecar already connected (AlreadyInUse)");
                Ok(ConnectOutcome::AlreadyActive)
            }
            kind => Err(LauncherError::NonZeroExit {
                code: kind.code(),
                output: output.output,
            }),
        }
    }

    /// Stop Sidecar on `device`
    pub async fn disconnect(&self, device: &str) -> Result<()> {
        info!("Disconnecting from {}...", device);
        let output = self.invoke(Subcommand::Disconnect, Some(device)).await?;

        match ExitKind::from_code(output.code) {
            ExitKind::Success => {
                info!("Sidecar disconnected successfully");
                *self.cached_device.lock() = None;
                Ok(())
            }
            kind => Err(LauncherError::NonZeroExit {
                code: kind.code(),
                output: output.output,
            }),
        }
    }

    /// Whether Sidecar currently reports a connection
    ///
    /// Never fails: a missing executable, launch error or timeout reads as
    /// not connected.
    pub async fn status(&self) -> bool {
        match self.invoke(Subcommand::Status, None).await {
            Ok(output) => output.output.to_lowercase().contains("connected"),
            Err(e) => {
                debug!("Status check failed: {}", e);
                false
            }
        }
    }

    /// Resolve the iPad with retries, then connect to it
    pub async fn activate(&self) -> Result<ConnectOutcome> {
        let device = self.list_devices(self.settings.list_retries).await?;
        *self.cached_device.lock() = Some(device.clone());
        self.connect(&device).await
    }

    /// Disconnect the cached device, or the first listed one if nothing is cached
    pub async fn deactivate(&self) -> Result<()> {
        let cached = self.cached_device_name();
        let device = match cached {
            Some(device) => device,
            None => {
                info!("No cached device name, attempting to list devices...");
                self.list_devices(1).await?
            }
        };
        self.disconnect(&device).await
    }
}

/// First non-empty line containing `marker`, trimmed
pub fn find_device_line(output: &str, marker: &str) -> Option<String> {
    non_empty_lines(output)
        .find(|line| line.contains(marker))
        .map(str::to_string)
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Whether launcher output reports the device as already in use
pub fn is_already_active(output: &str) -> bool {
    output.contains("AlreadyInUse") || output.to_lowercase().contains("already")
}

fn log_unreachable_hints() {
    info!("Troubleshooting tips:");
    info!("  - Ensure the iPad is unlocked and connected via USB");
    info!("  - Check that WiFi and Bluetooth are enabled");
    info!("  - Verify Handoff is enabled (System Settings > General > AirDrop & Handoff)");
}

fn log_platform_error_hints() {
    info!("This usually indicates a system-level issue with Sidecar.");
    info!("Troubleshooting tips:");
    info!("  - Restart your Mac");
    info!("  - Sign out and back into iCloud");
    info!("  - Ensure the iPad and Mac use the same iCloud account");
}
