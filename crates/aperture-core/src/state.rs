//! Device lifecycle state (specification §3 "Device state machine").

use std::fmt;

/// Coarse-grained lifecycle state a Device Core reports to Components and to
/// the session layer. Transitions are driven by the Device Core and the
/// Exposure Pipeline / Accessory Coordinator, never set directly by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Idle,
    Connecting,
    Exposing,
    Downloading,
    Aborted,
    Parking,
    Parked,
    Slewing,
    Tracking,
    Error,
}

impl DeviceState {
    /// States a device can be safely torn down from without an explicit
    /// abort first.
    pub fn is_quiescent(self) -> bool {
        matches!(
            self,
            DeviceState::Idle | DeviceState::Parked | DeviceState::Aborted | DeviceState::Error
        )
    }

    /// States during which issuing a new exposure is rejected.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            DeviceState::Exposing
                | DeviceState::Downloading
                | DeviceState::Parking
                | DeviceState::Slewing
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Idle => "idle",
            DeviceState::Connecting => "connecting",
            DeviceState::Exposing => "exposing",
            DeviceState::Downloading => "downloading",
            DeviceState::Aborted => "aborted",
            DeviceState::Parking => "parking",
            DeviceState::Parked => "parked",
            DeviceState::Slewing => "slewing",
            DeviceState::Tracking => "tracking",
            DeviceState::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiescent_states() {
        assert!(DeviceState::Idle.is_quiescent());
        assert!(DeviceState::Parked.is_quiescent());
        assert!(!DeviceState::Exposing.is_quiescent());
    }

    #[test]
    fn busy_states() {
        assert!(DeviceState::Exposing.is_busy());
        assert!(DeviceState::Downloading.is_busy());
        assert!(!DeviceState::Idle.is_busy());
        assert!(!DeviceState::Tracking.is_busy());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(DeviceState::Exposing.to_string(), "exposing");
    }
}
