//! Scanning Module
//!
//! Asynchronous discovery shared by all transports. A scan is started, the
//! caller gets an immediate [`ScanAck`](crate::transport::ScanAck), and the
//! result callback fires exactly once with a [`ScanReport`].

mod coordinator;
mod descriptor;
pub mod wifi;

pub use coordinator::{ScanFailure, ScanningCoordinator};
pub use descriptor::{parse_bluetooth_identifier, BluetoothDevice, BluetoothTarget, DeviceDescriptor};
pub use wifi::{extract_ssid, RawNetwork, WifiNetwork, WifiSelection};

use crate::transport::TransportKind;

/// Result callback; consumed by the single delivery
pub type ScanCallback = Box<dyn FnOnce(ScanReport) + Send + 'static>;

/// How a scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    NothingFound,
    TimedOut,
    AlreadyScanning,
    Unavailable(String),
    PermissionDenied(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub kind: TransportKind,
    pub devices: Vec<DeviceDescriptor>,
    pub status: ScanStatus,
}

impl ScanReport {
    pub fn failed(kind: TransportKind, status: ScanStatus) -> Self {
        Self {
            kind,
            devices: Vec::new(),
            status,
        }
    }

    /// Selectable device lines, or human-readable placeholders when there
    /// is nothing to select
    pub fn lines(&self) -> Vec<String> {
        if !self.devices.is_empty() {
            let rendered = self.devices.iter().map(DeviceDescriptor::render);
            return match self.kind {
                TransportKind::Wifi => std::iter::once("Found WiFi Networks:".to_string())
                    .chain(rendered)
                    .chain(["".to_string(), "Tap on your RC Car's network to connect".to_string()])
                    .collect(),
                _ => rendered.collect(),
            };
        }

        let lines: Vec<&str> = match (&self.status, self.kind) {
            (ScanStatus::NothingFound | ScanStatus::Completed, TransportKind::Ble) => {
                vec!["No BLE devices found - Make sure devices are discoverable"]
            }
            (ScanStatus::NothingFound | ScanStatus::Completed, TransportKind::Classic) => {
                vec!["No paired Classic BT devices found", "Pair your RC Car in system Bluetooth settings first"]
            }
            (ScanStatus::NothingFound | ScanStatus::Completed, TransportKind::Wifi) => vec![
                "No RC Car networks found",
                "Try:",
                "1. Moving closer to RC Car",
                "2. Restarting RC Car",
                "3. Checking if WiFi is enabled on car",
            ],
            (ScanStatus::TimedOut, _) => vec!["Scan timed out", "Please try again"],
            (ScanStatus::AlreadyScanning, _) => vec!["Scan already in progress"],
            (ScanStatus::Unavailable(reason), _) => return vec![reason.clone()],
            (ScanStatus::PermissionDenied(reason), _) => {
                return vec![format!("Permission required: {reason}")]
            }
            (ScanStatus::Failed(reason), _) => return vec![format!("Scan error: {reason}")],
        };
        lines.into_iter().map(String::from).collect()
    }
}
