//! Tracking of currently attached target devices

use std::collections::HashSet;

/// Set of attached target devices
///
/// Devices with a serial number are tracked by identity. Devices without
/// one cannot be matched between attach and detach, so they are
/// reference-counted instead: every unkeyed detach releases one unkeyed
/// slot, whichever device it was.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    serials: HashSet<String>,
    unkeyed: usize,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attached device. Returns false if the serial was already tracked.
    pub fn add(&mut self, serial: Option<&str>) -> bool {
        match serial {
            Some(serial) => self.serials.insert(serial.to_string()),
            None => {
                self.unkeyed += 1;
                true
            }
        }
    }

    /// Record a detached device. Returns false if nothing matched.
    pub fn remove(&mut self, serial: Option<&str>) -> bool {
        match serial {
            Some(serial) => self.serials.remove(serial),
            None => {
                if self.unkeyed == 0 {
                    return false;
                }
                self.unkeyed -= 1;
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty() && self.unkeyed == 0
    }

    /// Number of attached devices (keyed and unkeyed)
    pub fn len(&self) -> usize {
        self.serials.len() + self.unkeyed
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.serials.contains(serial)
    }
}
