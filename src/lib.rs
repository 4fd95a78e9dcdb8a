//! Auto-Sidecar
//!
//! Background daemon that starts Sidecar when an iPad is plugged in over USB.
//!
//! # Features
//! - Watches USB hotplug events and recognizes iPads by vendor ID and product name
//! - Drives the external `SidecarLauncher` tool with retries and bounded waits
//! - Debounces rapid reconnects and stops retrying after repeated failures
//! - Pauses while the system sleeps and resets failures on wake
//! - Persists preferences shared between the daemon and the CLI

pub mod core;
pub mod launcher;
pub mod logging;
pub mod orchestrator;
pub mod power;
pub mod usb;

pub use core::config::Config;
pub use core::preferences::{FilePreferences, MemoryPreferences, PreferenceStore};
pub use core::state::{Phase, Snapshot};
pub use launcher::{LauncherError, SidecarLauncher};
pub use orchestrator::{ActivationPolicy, Orchestrator, OrchestratorHandle};
pub use power::{PowerEvent, PowerMonitor};
pub use usb::{DeviceClass, DeviceDescriptor, HotplugEvent, HotplugWatcher};
