//! Telemetry lines sent back by the vehicle
//!
//! The firmware sends free text. Only lines mentioning the battery are
//! interpreted: the first run of digits is the charge percentage.

/// A received telemetry line and whatever could be extracted from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub line: String,
    pub battery_percent: Option<u8>,
}

impl TelemetryFrame {
    pub fn parse(line: &str) -> Self {
        Self {
            line: line.to_string(),
            battery_percent: parse_battery(line),
        }
    }
}

/// Extract a battery percentage from a telemetry line
///
/// The line must contain `BAT` or `battery` (case-insensitive). The first run
/// of ASCII digits is the value, clamped to 0-100.
pub fn parse_battery(line: &str) -> Option<u8> {
    if !line.to_ascii_uppercase().contains("BAT") {
        return None;
    }

    let start = line.find(|c: char| c.is_ascii_digit())?;
    let digits: &str = line[start..]
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or_default();

    // Leading zeros carry no weight; whatever is left past three digits is out of range
    let significant = digits.trim_start_matches('0');
    let value = if significant.len() > 3 {
        100
    } else if significant.is_empty() {
        0
    } else {
        significant.parse::<u32>().ok()?.min(100)
    };
    Some(value as u8)
}
