//! WiFi scan classification and SSID extraction
//!
//! Raw network descriptors from the radio are tiered by signal, banded by
//! frequency, labelled by security and tagged when the SSID looks like a
//! vehicle access point. Rendered lines use the format
//! ```text
//! RC Car: <ssid>
//!    <tier> | <band> | <level>dBm | <security>
//! ```

use std::fmt;

/// Networks classified per scan at most
pub const MAX_WIFI_RESULTS: usize = 20;

/// SSID fragments that mark a likely vehicle access point
pub const RC_KEYWORDS: [&str; 6] = ["RC", "CAR", "ESP32", "ARDUINO", "ROBOT", "DRONE"];

/// A network as reported by the radio, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNetwork {
    pub ssid: String,
    pub level_dbm: i32,
    pub frequency_mhz: u32,
    pub capabilities: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTier {
    Strong,
    Medium,
    Weak,
}

impl SignalTier {
    pub fn from_level(level_dbm: i32) -> Self {
        if level_dbm >= -50 {
            SignalTier::Strong
        } else if level_dbm >= -70 {
            SignalTier::Medium
        } else {
            SignalTier::Weak
        }
    }
}

impl fmt::Display for SignalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalTier::Strong => write!(f, "Strong"),
            SignalTier::Medium => write!(f, "Medium"),
            SignalTier::Weak => write!(f, "Weak"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Ghz2_4,
    Ghz5,
}

impl Band {
    pub fn from_frequency(frequency_mhz: u32) -> Self {
        if frequency_mhz > 3000 {
            Band::Ghz5
        } else {
            Band::Ghz2_4
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Ghz2_4 => write!(f, "2.4GHz"),
            Band::Ghz5 => write!(f, "5GHz"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
}

impl Security {
    /// Label a capability string, checking WEP, WPA, WPA2, WPA3 in that order
    pub fn from_capabilities(capabilities: &str) -> Self {
        let caps = capabilities.to_ascii_uppercase();
        [
            ("WEP", Security::Wep),
            ("WPA", Security::Wpa),
            ("WPA2", Security::Wpa2),
            ("WPA3", Security::Wpa3),
        ]
        .into_iter()
        .find(|(marker, _)| caps.contains(marker))
        .map(|(_, security)| security)
        .unwrap_or(Security::Open)
    }

    pub fn is_secured(self) -> bool {
        self != Security::Open
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Security::Open => "Open",
            Security::Wep => "WEP",
            Security::Wpa => "WPA",
            Security::Wpa2 => "WPA2",
            Security::Wpa3 => "WPA3",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCategory {
    RcCar,
    Generic,
}

impl NetworkCategory {
    pub fn from_ssid(ssid: &str) -> Self {
        let upper = ssid.to_uppercase();
        if RC_KEYWORDS.iter().any(|k| upper.contains(k)) {
            NetworkCategory::RcCar
        } else {
            NetworkCategory::Generic
        }
    }

    fn marker(self) -> &'static str {
        match self {
            NetworkCategory::RcCar => "RC Car",
            NetworkCategory::Generic => "WiFi",
        }
    }
}

/// A classified WiFi scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiNetwork {
    pub ssid: String,
    pub level_dbm: i32,
    pub frequency_mhz: u32,
    pub tier: SignalTier,
    pub band: Band,
    pub security: Security,
    pub category: NetworkCategory,
}

impl WifiNetwork {
    /// Classify a raw result; hidden or unprintable SSIDs yield `None`
    pub fn classify(raw: &RawNetwork) -> Option<Self> {
        let ssid = raw.ssid.replace('"', "");
        if ssid.trim().is_empty()
            || ssid.starts_with("\\x00")
            || ssid.contains('\0')
            || clean_ssid(&ssid).is_empty()
        {
            return None;
        }

        Some(Self {
            category: NetworkCategory::from_ssid(&ssid),
            ssid,
            level_dbm: raw.level_dbm,
            frequency_mhz: raw.frequency_mhz,
            tier: SignalTier::from_level(raw.level_dbm),
            band: Band::from_frequency(raw.frequency_mhz),
            security: Security::from_capabilities(&raw.capabilities),
        })
    }

    pub fn is_rc_like(&self) -> bool {
        self.category == NetworkCategory::RcCar
    }

    /// Two-line rendering: header plus indented detail line
    pub fn render(&self) -> String {
        format!(
            "{}: {}\n   {} | {} | {}dBm | {}",
            self.category.marker(),
            self.ssid,
            self.tier,
            self.band,
            self.level_dbm,
            self.security
        )
    }
}

/// Pull the SSID out of a rendered scan line
///
/// `RC Car: X` and `WiFi: X` yield `X`; `Name (aa:bb:..)` yields `Name`;
/// anything else is taken verbatim. The result is cleaned and trimmed.
pub fn extract_ssid(line: &str) -> String {
    let first = line.trim().lines().next().unwrap_or_default().trim();

    let ssid = if let Some((_, rest)) = first.split_once("RC Car:") {
        rest
    } else if let Some((_, rest)) = first.split_once("WiFi:") {
        rest
    } else if first.contains('(') && first.contains(')') {
        first.split('(').next().unwrap_or_default()
    } else {
        first
    };

    clean_ssid(ssid)
}

/// Strip characters outside printable ASCII and the permitted extended
/// range (U+0600..=U+06FF), then trim
pub fn clean_ssid(ssid: &str) -> String {
    ssid.chars()
        .filter(|c| matches!(c, '\x20'..='\x7E' | '\u{0600}'..='\u{06FF}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether a rendered line describes a protected network
pub fn is_secured_line(line: &str) -> bool {
    line.contains("WEP") || line.contains("WPA")
}

/// What the UI needs to know after the user picks a WiFi line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSelection {
    pub ssid: String,
    pub requires_passphrase: bool,
}

impl WifiSelection {
    pub fn from_line(line: &str) -> Self {
        Self {
            ssid: extract_ssid(line),
            requires_passphrase: is_secured_line(line),
        }
    }
}
