//! Observable orchestrator state

use serde::Serialize;

/// Conceptual activation state, derived from a [`Snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Auto-activation turned off
    Disabled,
    /// System asleep
    Sleeping,
    /// An activation call is running
    Activating,
    /// Too many consecutive failures; waiting for the iPad to be unplugged
    CoolingDown,
    /// iPad attached, activation scheduled after the settle delay
    Debouncing,
    /// iPad attached, nothing scheduled
    Attached,
    /// No iPad attached
    Idle,
}

/// Read-only view of the orchestrator state for presentation layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Auto-activation preference as of the last event
    pub enabled: bool,
    /// At least one iPad is attached
    pub has_connected_device: bool,
    /// System is asleep
    pub sleeping: bool,
    /// Consecutive failed activation attempts
    pub failure_count: u32,
    /// Failures before attempts stop
    pub max_failures: u32,
    /// An activation call is in flight
    pub activating: bool,
    /// An activation is scheduled but has not fired yet
    pub activation_pending: bool,
    /// Result of the last Sidecar status probe, if any
    pub sidecar_active: Option<bool>,
    /// Device name last resolved through the launcher
    pub device_name: Option<String>,
}

impl Snapshot {
    pub fn cooling_down(&self) -> bool {
        self.max_failures > 0 && self.failure_count >= self.max_failures
    }

    pub fn phase(&self) -> Phase {
        if self.activating {
            Phase::Activating
        } else if !self.enabled {
            Phase::Disabled
        } else if self.sleeping {
            Phase::Sleeping
        } else if !self.has_connected_device {
            Phase::Idle
        } else if self.cooling_down() {
            Phase::CoolingDown
        } else if self.activation_pending {
            Phase::Debouncing
        } else {
            Phase::Attached
        }
    }

    /// Status line shown in menus and logs
    pub fn status_text(&self) -> String {
        let status = if !self.enabled {
            "Auto-Activation Disabled".to_string()
        } else if self.cooling_down() && self.has_connected_device {
            format!(
                "Gave up after {} failed attempts (unplug the iPad to retry)",
                self.failure_count
            )
        } else if self.has_connected_device {
            "iPad Connected".to_string()
        } else {
            "Waiting for iPad".to_string()
        };
        format!("Status: {}", status)
    }
}
