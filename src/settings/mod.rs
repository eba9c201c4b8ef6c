//! Persisted user settings

mod saved;
mod store;

pub use saved::{default_name, SavedConnection, SavedConnections};
pub use store::SettingsStore;

use crate::transport::{TransportKind, DEFAULT_RFCOMM_CHANNEL};
use rc_link_shared::link::{DEFAULT_TARGET_IP, DEFAULT_TARGET_PORT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connection_type: TransportKind,
    /// Last Classic BT peer, as `AA:BB:CC:DD:EE:FF`
    pub classic_device_address: Option<String>,
    pub classic_channel: u8,
    pub target_device_ip: String,
    pub target_device_port: u16,
    pub battery_warning_level: u8,
    pub log_level: String, // "trace", "debug", "info", "warn", "error"
    pub saved_wifi_connections: SavedConnections,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_type: TransportKind::Ble,
            classic_device_address: None,
            classic_channel: DEFAULT_RFCOMM_CHANNEL,
            target_device_ip: DEFAULT_TARGET_IP.to_string(),
            target_device_port: DEFAULT_TARGET_PORT,
            battery_warning_level: 30,
            log_level: "info".to_string(),
            saved_wifi_connections: SavedConnections::default(),
        }
    }
}

impl Settings {
    pub fn is_battery_low(&self, level: u8) -> bool {
        level <= self.battery_warning_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.connection_type, TransportKind::Ble);
        assert_eq!(settings.classic_channel, 1);
        assert_eq!(settings.target_device_ip, "192.168.4.1");
        assert_eq!(settings.target_device_port, 80);
        assert_eq!(settings.battery_warning_level, 30);
        assert!(settings.is_battery_low(30));
        assert!(!settings.is_battery_low(31));
    }

    #[test]
    fn test_missing_fields_default() {
        let settings: Settings =
            serde_json::from_str(r#"{"connection_type":"wifi","target_device_port":8080}"#).expect("parse");
        assert_eq!(settings.connection_type, TransportKind::Wifi);
        assert_eq!(settings.target_device_port, 8080);
        assert_eq!(settings.target_device_ip, "192.168.4.1");
        assert!(settings.saved_wifi_connections.is_empty());
    }
}
