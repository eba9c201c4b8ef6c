//! Signal Module
//!
//! Staleness-based link quality and the periodic monitor that forces a
//! disconnect once a link has gone silent.

mod monitor;

pub use monitor::{SignalMonitor, SignalMonitorHandle};

use rc_link_shared::link::SIGNAL_LOST_FACTOR;
use std::fmt;
use std::time::Duration;

/// Inferred link quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStrength {
    None,
    Weak,
    Strong,
}

impl SignalStrength {
    /// Pure function of the time since the last successful communication
    pub fn classify(elapsed: Duration, interval: Duration) -> Self {
        if elapsed > interval * SIGNAL_LOST_FACTOR {
            SignalStrength::None
        } else if elapsed > interval {
            SignalStrength::Weak
        } else {
            SignalStrength::Strong
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStrength::None => write!(f, "No Signal"),
            SignalStrength::Weak => write!(f, "Weak Signal"),
            SignalStrength::Strong => write!(f, "Strong Signal"),
        }
    }
}
