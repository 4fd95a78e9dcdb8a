//! Polling USB hotplug detection over sysfs
//!
//! Used where IOKit is not available. Each poll reads the attributes of every
//! device under `/sys/bus/usb/devices` and diffs the result against the
//! previous scan. Interfaces (`1-1:1.0`) and devices without vendor/product
//! attributes are skipped.

use super::{DeviceDescriptor, HotplugError, HotplugEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default sysfs USB device directory
pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Name used when a device has no product string
const UNKNOWN_DEVICE_NAME: &str = "USB Device";

/// Device snapshot keyed by sysfs entry name (bus port path)
type Scan = HashMap<String, DeviceDescriptor>;

/// Polling hotplug watcher
pub struct HotplugWatcher {
    stop: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Start polling for devices with the given vendor ID
    pub fn start(
        vendor_id: u16,
        poll_interval: Duration,
        event_tx: mpsc::UnboundedSender<HotplugEvent>,
    ) -> Result<Self, HotplugError> {
        Self::start_at(PathBuf::from(SYSFS_USB_DEVICES), vendor_id, poll_interval, event_tx)
    }

    /// Start polling a specific device directory
    pub fn start_at(
        root: PathBuf,
        vendor_id: u16,
        poll_interval: Duration,
        event_tx: mpsc::UnboundedSender<HotplugEvent>,
    ) -> Result<Self, HotplugError> {
        if !root.is_dir() {
            return Err(HotplugError::Unavailable { path: root });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread_handle = thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || {
                info!(
                    "USB polling monitor started for VID:0x{:04X} ({:?})",
                    vendor_id, root
                );
                let mut previous = Scan::new();

                while !stop_clone.load(Ordering::SeqCst) {
                    let current: Scan = scan_devices(&root)
                        .into_iter()
                        .filter(|(_, device)| device.vendor_id == vendor_id)
                        .collect();

                    for event in diff(&previous, &current) {
                        debug!("USB change: {:?}", event);
                        if event_tx.send(event).is_err() {
                            info!("Hotplug receiver dropped, stopping USB polling monitor");
                            return;
                        }
                    }
                    previous = current;

                    thread::sleep(poll_interval);
                }
                info!("USB polling monitor stopped");
            })?;

        Ok(Self {
            stop,
            thread_handle: Some(thread_handle),
        })
    }

    /// Stop the watcher and wait for its thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read every USB device under `root`
pub fn scan_devices(root: &Path) -> Vec<(String, DeviceDescriptor)> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {:?}: {}", root, e);
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let key = entry.file_name().to_string_lossy().into_owned();
            if key.contains(':') {
                return None;
            }
            read_device(&entry.path()).map(|device| (key, device))
        })
        .collect()
}

fn read_device(dir: &Path) -> Option<DeviceDescriptor> {
    let vendor_id = read_hex(&dir.join("idVendor"))?;
    let product_id = read_hex(&dir.join("idProduct"))?;
    let name = read_attr(&dir.join("product")).unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
    let serial_number = read_attr(&dir.join("serial"));
    Some(DeviceDescriptor::new(name, vendor_id, product_id, serial_number))
}

fn read_attr(path: &Path) -> Option<String> {
    let value = std::fs::read_to_string(path).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn read_hex(path: &Path) -> Option<u16> {
    u16::from_str_radix(&read_attr(path)?, 16).ok()
}

/// Events that turn `previous` into `current`, detaches first
fn diff(previous: &Scan, current: &Scan) -> Vec<HotplugEvent> {
    let mut detached: Vec<_> = previous
        .iter()
        .filter(|(key, device)| current.get(*key) != Some(*device))
        .collect();
    let mut attached: Vec<_> = current
        .iter()
        .filter(|(key, device)| previous.get(*key) != Some(*device))
        .collect();
    detached.sort_by(|a, b| a.0.cmp(b.0));
    attached.sort_by(|a, b| a.0.cmp(b.0));

    detached
        .into_iter()
        .map(|(_, device)| HotplugEvent::Detached(device.clone()))
        .chain(
            attached
                .into_iter()
                .map(|(_, device)| HotplugEvent::Attached(device.clone())),
        )
        .collect()
}
