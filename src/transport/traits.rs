//! Transport trait abstraction for the three interchangeable vehicle links

use crate::scanning::ScanCallback;
use crate::transport::link::{BatteryCallback, LinkState};
use crate::signal::SignalStrength;
use async_trait::async_trait;
use rc_link_shared::Command;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Available transport types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ble,
    Classic,
    Wifi,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "BLE"),
            TransportKind::Classic => write!(f, "Classic BT"),
            TransportKind::Wifi => write!(f, "WiFi"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ble" => Ok(TransportKind::Ble),
            "classic" | "bt" | "rfcomm" => Ok(TransportKind::Classic),
            "wifi" | "tcp" => Ok(TransportKind::Wifi),
            other => Err(LinkError::InvalidIdentifier(format!("unknown transport {other}"))),
        }
    }
}

/// What to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectRequest {
    /// A scan result line or bare address/SSID
    Identifier(String),
    /// Associate with a WiFi network, then open the control socket
    WifiNetwork {
        ssid: String,
        passphrase: Option<String>,
        target: SocketAddr,
    },
    /// Open the control socket on an already reachable network
    Endpoint(SocketAddr),
}

impl ConnectRequest {
    pub fn describe(&self) -> String {
        match self {
            ConnectRequest::Identifier(id) => id.lines().next().unwrap_or_default().to_string(),
            ConnectRequest::WifiNetwork { ssid, target, .. } => format!("{ssid} ({target})"),
            ConnectRequest::Endpoint(addr) => addr.to_string(),
        }
    }
}

/// Immediate acknowledgement of a scan request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAck {
    Started,
    AlreadyScanning,
}

/// Errors a transport can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("permission missing: {0}")]
    PermissionDenied(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("passphrase required for {ssid}")]
    PassphraseRequired { ssid: String },

    #[error("could not connect to network {ssid}: {reason}")]
    Association { ssid: String, reason: String },

    #[error("TCP connection failed to {addr}: {reason}")]
    Tcp { addr: SocketAddr, reason: String },

    #[error("RFCOMM connect failed: {0}")]
    Rfcomm(String),

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("unsupported by {0} transport")]
    Unsupported(TransportKind),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Io(e.to_string())
    }
}

impl From<bluer::Error> for LinkError {
    fn from(e: bluer::Error) -> Self {
        match e.kind {
            bluer::ErrorKind::NotReady | bluer::ErrorKind::NotAvailable => {
                LinkError::RadioUnavailable(e.message)
            }
            bluer::ErrorKind::NotAuthorized | bluer::ErrorKind::NotPermitted => {
                LinkError::PermissionDenied(e.message)
            }
            bluer::ErrorKind::DoesNotExist => LinkError::DeviceNotFound(e.message),
            _ => LinkError::Gatt(e.to_string()),
        }
    }
}

/// A byte stream that carries the command protocol
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Human-readable peer description for logs
    fn peer(&self) -> String;
}

/// One physical link to the vehicle
///
/// Instances are built once and reused: after every disconnect they return
/// to a clean, disconnected state.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Shared connection bookkeeping for this transport
    fn link(&self) -> &LinkState;

    /// Radio readiness probe (adapter present and enabled). Bounded in time.
    async fn initialize(&self) -> bool;

    /// Begin discovery; `on_result` fires exactly once with the outcome
    fn start_scan(&self, duration: Duration, on_result: ScanCallback) -> ScanAck;

    /// Bring the link up
    async fn connect(&self, request: &ConnectRequest) -> Result<(), LinkError>;

    /// Write one framed command; fails fast when not connected
    async fn send(&self, command: &Command) -> Result<(), LinkError>;

    /// Tear the link down. Idempotent; never fails.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool {
        self.link().is_connected()
    }

    fn device_name(&self) -> Option<String> {
        self.link().peer_name()
    }

    fn check_signal_strength(&self) -> SignalStrength {
        self.link().check_signal_strength()
    }

    fn set_battery_callback(&self, callback: BatteryCallback) {
        self.link().set_battery_callback(callback);
    }

    fn battery_level(&self) -> Option<u8> {
        self.link().battery_level()
    }
}
