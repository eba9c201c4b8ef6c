//! Classic Bluetooth transport: line-framed serial over RFCOMM

use crate::scanning::{parse_bluetooth_identifier, DeviceDescriptor, ScanCallback, ScanFailure, ScanningCoordinator};
use crate::transport::bt_discovery::BtDiscovery;
use crate::transport::link::{LinkEventSender, LinkState};
use crate::transport::rfcomm::{RfcommTransportStream, DEFAULT_RFCOMM_CHANNEL};
use crate::transport::session::StreamSession;
use crate::transport::traits::{ConnectRequest, LinkError, ScanAck, Transport, TransportKind};
use async_trait::async_trait;
use rc_link_shared::link::{READ_TIMEOUT_MS, SIGNAL_INTERVAL_MS, WRITE_TIMEOUT_MS};
use rc_link_shared::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ClassicConfig {
    pub channel: u8,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub signal_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ClassicConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_RFCOMM_CHANNEL,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(WRITE_TIMEOUT_MS),
            signal_interval: Duration::from_millis(SIGNAL_INTERVAL_MS),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

pub struct ClassicTransport {
    config: ClassicConfig,
    link: Arc<LinkState>,
    scanner: ScanningCoordinator,
    session: Mutex<Option<StreamSession>>,
}

impl ClassicTransport {
    pub fn new(config: ClassicConfig, events: LinkEventSender) -> Self {
        let link = Arc::new(LinkState::new(TransportKind::Classic, config.signal_interval, events));
        Self {
            config,
            link,
            scanner: ScanningCoordinator::new(TransportKind::Classic),
            session: Mutex::new(None),
        }
    }

    async fn teardown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}

/// Classic discovery lists bonded devices; pairing happens in the system UI
async fn discover() -> Result<Vec<DeviceDescriptor>, ScanFailure> {
    let adapter = BtDiscovery::get_adapter().await?;
    let devices = BtDiscovery::paired_devices(&adapter).await?;
    Ok(devices.into_iter().map(DeviceDescriptor::Classic).collect())
}

#[async_trait]
impl Transport for ClassicTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Classic
    }

    fn link(&self) -> &LinkState {
        &self.link
    }

    async fn initialize(&self) -> bool {
        BtDiscovery::is_ready(self.config.probe_timeout).await
    }

    fn start_scan(&self, duration: Duration, on_result: ScanCallback) -> ScanAck {
        self.scanner.start(duration, discover(), on_result)
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<(), LinkError> {
        let ConnectRequest::Identifier(identifier) = request else {
            return Err(LinkError::Unsupported(TransportKind::Classic));
        };
        let target = parse_bluetooth_identifier(identifier)?;

        self.teardown().await;
        let generation = self.link.begin_session();

        let stream = match RfcommTransportStream::connect(
            target.address,
            self.config.channel,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[BT] connect to {} failed: {}", target.address, e);
                self.link.mark_disconnected();
                return Err(e);
            }
        };

        let session = StreamSession::start(stream, self.link.clone(), generation, self.config.read_timeout);
        *self.session.lock().await = Some(session);

        if !self.link.mark_connected(generation, target.label()) {
            self.teardown().await;
            return Err(LinkError::Io("connect superseded by disconnect".into()));
        }
        info!("[BT] Connected to {}", target.label());
        Ok(())
    }

    async fn send(&self, command: &Command) -> Result<(), LinkError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref().filter(|_| self.link.is_connected()) else {
            return Err(LinkError::NotConnected);
        };
        session.write_line(command, self.config.write_timeout).await?;
        self.link.touch(session.generation());
        Ok(())
    }

    async fn disconnect(&self) {
        self.link.mark_disconnected();
        self.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn transport() -> ClassicTransport {
        let (tx, _rx) = mpsc::unbounded_channel();
        ClassicTransport::new(ClassicConfig::default(), tx)
    }

    #[test]
    fn test_default_config() {
        let config = ClassicConfig::default();
        assert_eq!(config.channel, DEFAULT_RFCOMM_CHANNEL);
        assert_eq!(config.read_timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_invalid_identifier_rejected_before_radio() {
        let transport = transport();
        let err = transport
            .connect(&ConnectRequest::Identifier("no address here".into()))
            .await
            .expect_err("invalid");
        assert!(matches!(err, LinkError::InvalidIdentifier(_)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_and_disconnect_when_idle() {
        let transport = transport();
        assert_eq!(transport.send(&Command::horn(true)).await, Err(LinkError::NotConnected));
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_endpoint_requests_unsupported() {
        let transport = transport();
        let err = transport
            .connect(&ConnectRequest::Endpoint("192.168.4.1:80".parse().expect("addr")))
            .await
            .expect_err("unsupported");
        assert_eq!(err, LinkError::Unsupported(TransportKind::Classic));
    }
}
