pub mod ble;
pub mod bt_discovery;
pub mod classic;
pub mod link;
pub mod rfcomm;
pub mod session;
pub mod tcp;
pub mod traits;
pub mod wifi;

#[cfg(test)]
pub mod testing;

pub use ble::{BleConfig, BleTransport};
pub use bt_discovery::BtDiscovery;
pub use classic::{ClassicConfig, ClassicTransport};
pub use link::{BatteryCallback, LinkEventReceiver, LinkEventSender, LinkLost, LinkState};
pub use rfcomm::{RfcommTransportStream, DEFAULT_RFCOMM_CHANNEL};
pub use session::StreamSession;
pub use tcp::TcpTransportStream;
pub use traits::{ConnectRequest, LinkError, ScanAck, Transport, TransportKind, TransportStream};
pub use wifi::{WifiConfig, WifiTransport};
