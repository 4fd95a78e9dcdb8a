//! USB module - device classification, connection tracking and hotplug sources

mod device;
#[cfg(target_os = "macos")]
mod hotplug_macos;
#[cfg(not(target_os = "macos"))]
mod hotplug_sysfs;
mod tracker;

pub use device::{is_target_device, DeviceClass, DeviceDescriptor, APPLE_VENDOR_ID, IPAD_NAME_MARKER};
#[cfg(target_os = "macos")]
pub use hotplug_macos::HotplugWatcher;
#[cfg(not(target_os = "macos"))]
pub use hotplug_sysfs::{scan_devices, HotplugWatcher, SYSFS_USB_DEVICES};
pub use tracker::ConnectionTracker;

/// Attach/detach notification from a hotplug source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// Device was connected (or was already present when the watcher started)
    Attached(DeviceDescriptor),
    /// Device was removed
    Detached(DeviceDescriptor),
}

impl HotplugEvent {
    pub fn device(&self) -> &DeviceDescriptor {
        match self {
            HotplugEvent::Attached(device) | HotplugEvent::Detached(device) => device,
        }
    }
}

/// Hotplug source failures
#[derive(Debug, thiserror::Error)]
pub enum HotplugError {
    #[error("{call} failed: {code}")]
    IoKit { call: &'static str, code: i32 },

    #[error("USB device tree not available at {path:?}")]
    Unavailable { path: std::path::PathBuf },

    #[error("Failed to start hotplug thread: {0}")]
    Thread(#[from] std::io::Error),
}
