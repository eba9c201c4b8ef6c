//! rc-link Shared Protocol Types
//!
//! This crate provides the pieces of the vehicle link that carry no I/O:
//! the ASCII command codec, newline framing, telemetry parsing and the
//! connection lifecycle state machine. Both the controller and the vehicle
//! simulator build on it.

pub mod codec;
pub mod state_machine;
pub mod telemetry;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{Command, ControlPanel, Gear, LineDecoder, Toggle, TurnSignal};
pub use state_machine::{ConnectionState, ConnectionStateMachine, LifecycleEvent};
pub use telemetry::TelemetryFrame;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get current timestamp in whole seconds since Unix epoch
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Link timing parameters shared by every transport
pub mod link {
    /// Period between signal monitor ticks in milliseconds
    pub const SIGNAL_CHECK_PERIOD_MS: u64 = 3000;

    /// Staleness interval; Weak above one interval, lost above three
    pub const SIGNAL_INTERVAL_MS: u64 = 5000;

    /// Multiplier applied to the interval before a link is declared lost
    pub const SIGNAL_LOST_FACTOR: u32 = 3;

    /// Read timeout used by receive loops so they notice a stop request
    pub const READ_TIMEOUT_MS: u64 = 500;

    /// Upper bound for a single command write
    pub const WRITE_TIMEOUT_MS: u64 = 2000;

    /// Maximum number of remembered WiFi endpoints
    pub const MAX_SAVED_CONNECTIONS: usize = 10;

    /// Default vehicle control socket when none is configured
    pub const DEFAULT_TARGET_IP: &str = "192.168.4.1";
    pub const DEFAULT_TARGET_PORT: u16 = 80;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_helpers_agree() {
        let secs = now_secs();
        let ms = now_ms();
        assert!(secs > 0);
        assert!(ms / 1000 >= secs);
    }

    #[test]
    fn test_lost_threshold_exceeds_interval() {
        assert!(link::SIGNAL_CHECK_PERIOD_MS < link::SIGNAL_INTERVAL_MS);
        assert_eq!(link::SIGNAL_LOST_FACTOR, 3);
    }
}
