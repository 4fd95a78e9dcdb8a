//! Launcher module - drives the external SidecarLauncher executable

mod client;
mod error;
mod locate;
mod runner;

#[cfg(test)]
pub(crate) use client::test_support;

pub use client::{
    find_device_line, is_already_active, ConnectOutcome, LauncherSettings, SidecarLauncher,
};
pub use error::{ExitKind, LauncherError, EXIT_NO_REACHABLE_DEVICES, EXIT_PLATFORM_ERROR};
pub use locate::{candidate_paths, fallback_path, log_diagnostics, resolve_launcher_path, LAUNCHER_NAME};
pub use runner::{CommandOutput, CommandRunner, LocalCommandRunner, ProcessRunner};
