//! Device descriptors produced by discovery and the identifiers parsed back
//! out of their rendered lines

use crate::scanning::wifi::WifiNetwork;
use crate::transport::LinkError;
use bluer::Address;

/// A Bluetooth peer seen during discovery or listed as bonded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub name: Option<String>,
    pub address: Address,
    pub rssi: Option<i16>,
}

impl BluetoothDevice {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "Unknown Device",
        }
    }
}

/// One entry of a scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDescriptor {
    Ble(BluetoothDevice),
    Classic(BluetoothDevice),
    Wifi(WifiNetwork),
}

impl DeviceDescriptor {
    /// Identity used for de-duplication
    pub fn key(&self) -> String {
        match self {
            DeviceDescriptor::Ble(d) | DeviceDescriptor::Classic(d) => d.address.to_string(),
            DeviceDescriptor::Wifi(n) => n.ssid.clone(),
        }
    }

    /// Signal level in dBm, where known
    pub fn signal_dbm(&self) -> Option<i32> {
        match self {
            DeviceDescriptor::Ble(d) | DeviceDescriptor::Classic(d) => d.rssi.map(i32::from),
            DeviceDescriptor::Wifi(n) => Some(n.level_dbm),
        }
    }

    pub fn is_rc_like(&self) -> bool {
        matches!(self, DeviceDescriptor::Wifi(n) if n.is_rc_like())
    }

    /// Selectable line shown to the user. Feeding it back to `connect`
    /// reaches the same device.
    pub fn render(&self) -> String {
        match self {
            DeviceDescriptor::Ble(d) => match d.rssi {
                Some(rssi) => format!("{} ({}) - {}dBm", d.display_name(), d.address, rssi),
                None => format!("{} ({})", d.display_name(), d.address),
            },
            DeviceDescriptor::Classic(d) => format!("{} ({})", d.display_name(), d.address),
            DeviceDescriptor::Wifi(n) => n.render(),
        }
    }
}

/// Target parsed from a Bluetooth identifier string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothTarget {
    pub name: Option<String>,
    pub address: Address,
}

impl BluetoothTarget {
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.to_string())
    }
}

/// Parse `Name (AA:BB:CC:DD:EE:FF) - -60dBm`, `Name (AA:..)` or a bare address
pub fn parse_bluetooth_identifier(identifier: &str) -> Result<BluetoothTarget, LinkError> {
    let identifier = identifier.lines().next().unwrap_or_default().trim();

    let (name, address) = match identifier.rfind('(') {
        Some(open) if identifier[open..].contains(')') => {
            let rest = &identifier[open + 1..];
            let close = rest.find(')').unwrap_or(rest.len());
            let name = identifier[..open].trim();
            let name = (!name.is_empty()).then(|| name.to_string());
            (name, rest[..close].trim())
        }
        _ => (None, identifier),
    };

    let address = address
        .parse::<Address>()
        .map_err(|_| LinkError::InvalidIdentifier(identifier.to_string()))?;
    Ok(BluetoothTarget { name, address })
}
