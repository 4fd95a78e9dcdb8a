//! SidecarLauncher error and exit code taxonomy

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code: no reachable Sidecar devices
pub const EXIT_NO_REACHABLE_DEVICES: i32 = 2;

/// Exit code: SidecarCore private framework error
pub const EXIT_PLATFORM_ERROR: i32 = 4;

/// Classification of a SidecarLauncher exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    /// Exit code 2
    NoReachableDevices,
    /// Exit code 4
    PlatformError,
    /// Any other non-zero code (-1 when the process was killed by a signal)
    Failure(i32),
}

impl ExitKind {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Success,
            Some(EXIT_NO_REACHABLE_DEVICES) => Self::NoReachableDevices,
            Some(EXIT_PLATFORM_ERROR) => Self::PlatformError,
            Some(other) => Self::Failure(other),
            None => Self::Failure(-1),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NoReachableDevices => EXIT_NO_REACHABLE_DEVICES,
            Self::PlatformError => EXIT_PLATFORM_ERROR,
            Self::Failure(code) => code,
        }
    }
}

/// Failure of a SidecarLauncher operation
#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("SidecarLauncher not found at {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("No iPad found after {attempts} attempt(s)")]
    NoDeviceFound { attempts: u32 },

    #[error("Failed to run SidecarLauncher {subcommand}: {source}")]
    ProcessLaunchFailed {
        subcommand: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("SidecarLauncher {subcommand} timed out after {after:?}")]
    TimedOut {
        subcommand: &'static str,
        after: Duration,
    },

    #[error("SidecarLauncher exited with code {code}: {}", output.trim())]
    NonZeroExit { code: i32, output: String },
}
