//! USB device descriptors and target device classification

use crate::core::config::DeviceConfig;
use serde::{Deserialize, Serialize};

/// Apple's USB vendor ID
pub const APPLE_VENDOR_ID: u16 = 0x05ac;

/// Substring (lower-case) that identifies an iPad by its USB product name
pub const IPAD_NAME_MARKER: &str = "ipad";

/// Immutable description of a USB device as reported by the hotplug source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB product name
    pub name: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// USB serial number, when the device exposes one
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(
        name: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
            serial_number,
        }
    }

    /// Short description for log lines
    pub fn summary(&self) -> String {
        format!(
            "{} (VID:0x{:04X} PID:0x{:04X})",
            self.name, self.vendor_id, self.product_id
        )
    }
}

/// The class of device that triggers activation
///
/// A device belongs to the class when its vendor ID matches and either its
/// lower-cased name contains the name marker or its product ID is in the
/// optional allow-list. The allow-list only ever adds matches, so product IDs
/// that are not listed yet are still caught by the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClass {
    vendor_id: u16,
    name_marker: String,
    product_ids: Vec<u16>,
}

impl DeviceClass {
    pub fn new(vendor_id: u16, name_marker: &str, product_ids: Vec<u16>) -> Self {
        Self {
            vendor_id,
            name_marker: name_marker.to_lowercase(),
            product_ids,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.vendor_id,
            &config.name_marker,
            config.product_ids.clone(),
        )
    }

    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        if device.vendor_id != self.vendor_id {
            return false;
        }
        device.name.to_lowercase().contains(&self.name_marker)
            || self.product_ids.contains(&device.product_id)
    }
}

impl Default for DeviceClass {
    fn default() -> Self {
        Self::new(APPLE_VENDOR_ID, IPAD_NAME_MARKER, Vec::new())
    }
}

/// Whether the device is an iPad
pub fn is_target_device(device: &DeviceDescriptor) -> bool {
    device.vendor_id == APPLE_VENDOR_ID && device.name.to_lowercase().contains(IPAD_NAME_MARKER)
}
