use crate::settings::Settings;
use crate::transport::{BleConfig, ClassicConfig, TransportKind, WifiConfig};
use rc_link_shared::link::{SIGNAL_CHECK_PERIOD_MS, SIGNAL_INTERVAL_MS};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::warn;

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Signal monitor tick period
    pub signal_check_period: Duration,
    /// Silence after which a link counts as weak; three times this is lost
    pub signal_interval: Duration,
    /// Upper bound on a whole connect attempt, association included
    pub connect_timeout: Duration,
    pub ble: BleConfig,
    pub classic: ClassicConfig,
    pub wifi: WifiConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            signal_check_period: Duration::from_millis(SIGNAL_CHECK_PERIOD_MS),
            signal_interval: Duration::from_millis(SIGNAL_INTERVAL_MS),
            connect_timeout: Duration::from_secs(60),
            ble: BleConfig::default(),
            classic: ClassicConfig::default(),
            wifi: WifiConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Defaults overlaid with persisted values
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::default();
        config.classic.channel = settings.classic_channel;

        match settings.target_device_ip.parse::<IpAddr>() {
            Ok(ip) => config.wifi.default_target = SocketAddr::new(ip, settings.target_device_port),
            Err(_) => warn!(
                "Ignoring invalid target_device_ip {:?}; using {}",
                settings.target_device_ip, config.wifi.default_target
            ),
        }
        config
    }

    pub fn scan_duration(&self, kind: TransportKind) -> Duration {
        match kind {
            TransportKind::Ble | TransportKind::Classic => self.ble.scan_duration,
            TransportKind::Wifi => self.wifi.scan_duration,
        }
    }

    pub(crate) fn ble(&self) -> BleConfig {
        BleConfig {
            signal_interval: self.signal_interval,
            ..self.ble.clone()
        }
    }

    pub(crate) fn classic(&self) -> ClassicConfig {
        ClassicConfig {
            signal_interval: self.signal_interval,
            ..self.classic.clone()
        }
    }

    pub(crate) fn wifi(&self) -> WifiConfig {
        WifiConfig {
            signal_interval: self.signal_interval,
            ..self.wifi.clone()
        }
    }
}
