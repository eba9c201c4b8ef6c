//! WiFi transport: join the vehicle's access point, then talk line-framed
//! TCP to its control endpoint
//!
//! Association failures and TCP failures are reported separately so the
//! user can tell "wrong network/passphrase" from "car not listening".

mod nmcli;
mod radio;

pub use nmcli::NmcliRadio;
pub use radio::{RadioError, WifiRadio};

use crate::scanning::wifi::MAX_WIFI_RESULTS;
use crate::scanning::{
    DeviceDescriptor, ScanCallback, ScanFailure, ScanningCoordinator, WifiNetwork, WifiSelection,
};
use crate::settings::SettingsStore;
use crate::transport::link::{LinkEventSender, LinkState};
use crate::transport::session::{join_task, StreamSession};
use crate::transport::tcp::TcpTransportStream;
use crate::transport::traits::{ConnectRequest, LinkError, ScanAck, Transport, TransportKind};
use async_trait::async_trait;
use rc_link_shared::link::{
    DEFAULT_TARGET_IP, DEFAULT_TARGET_PORT, READ_TIMEOUT_MS, SIGNAL_INTERVAL_MS, WRITE_TIMEOUT_MS,
};
use rc_link_shared::Command;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WifiConfig {
    pub scan_duration: Duration,
    /// Control endpoint used when a plain scan line is selected
    pub default_target: SocketAddr,
    pub connect_timeout: Duration,
    pub association_timeout: Duration,
    /// Pause between association and the TCP connect
    pub settle_delay: Duration,
    pub association_poll: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub signal_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for WifiConfig {
    fn default() -> Self {
        let ip = DEFAULT_TARGET_IP
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1)));
        Self {
            scan_duration: Duration::from_secs(10),
            default_target: SocketAddr::new(ip, DEFAULT_TARGET_PORT),
            connect_timeout: Duration::from_secs(10),
            association_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
            association_poll: Duration::from_secs(3),
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(WRITE_TIMEOUT_MS),
            signal_interval: Duration::from_millis(SIGNAL_INTERVAL_MS),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

struct WifiSession {
    stream: StreamSession,
    target: SocketAddr,
    /// Set when this session joined a network itself
    ssid: Option<String>,
    watcher: Option<(CancellationToken, JoinHandle<()>)>,
}

pub struct WifiTransport {
    config: WifiConfig,
    radio: Arc<dyn WifiRadio>,
    link: Arc<LinkState>,
    scanner: ScanningCoordinator,
    session: Mutex<Option<WifiSession>>,
    saved: Option<Arc<SettingsStore>>,
}

impl WifiTransport {
    pub fn new(config: WifiConfig, radio: Arc<dyn WifiRadio>, events: LinkEventSender) -> Self {
        let link = Arc::new(LinkState::new(TransportKind::Wifi, config.signal_interval, events));
        Self {
            config,
            radio,
            link,
            scanner: ScanningCoordinator::new(TransportKind::Wifi),
            session: Mutex::new(None),
            saved: None,
        }
    }

    /// Record every successful connection in `store`
    pub fn with_saved_connections(mut self, store: Arc<SettingsStore>) -> Self {
        self.saved = Some(store);
        self
    }

    fn association_error(ssid: &str, e: RadioError) -> LinkError {
        match e {
            RadioError::Disabled => LinkError::RadioUnavailable("WiFi is disabled".into()),
            RadioError::PermissionDenied(reason) => LinkError::PermissionDenied(reason),
            other => LinkError::Association {
                ssid: ssid.to_string(),
                reason: other.to_string(),
            },
        }
    }

    async fn associate(&self, ssid: &str, passphrase: Option<&str>) -> Result<(), LinkError> {
        match self.radio.is_enabled().await {
            Ok(true) => {}
            Ok(false) => return Err(LinkError::RadioUnavailable("WiFi is disabled".into())),
            Err(e) => return Err(Self::association_error(ssid, e)),
        }

        info!("[WiFi] Joining network {}", ssid);
        match timeout(self.config.association_timeout, self.radio.associate(ssid, passphrase)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Self::association_error(ssid, e)),
            Err(_) => {
                return Err(LinkError::Association {
                    ssid: ssid.to_string(),
                    reason: "association timed out".into(),
                })
            }
        }

        // Let DHCP and routing settle before the TCP connect
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(())
    }

    async fn open(
        &self,
        generation: u64,
        ssid: Option<&str>,
        passphrase: Option<&str>,
        target: SocketAddr,
    ) -> Result<(), LinkError> {
        if let Some(ssid) = ssid {
            self.associate(ssid, passphrase).await?;
        }

        let stream = match self.connect_stream(generation, target).await {
            Ok(stream) => stream,
            Err(e) => {
                // No session owns the network yet
                if let Some(ssid) = ssid {
                    self.release(ssid).await;
                }
                return Err(e);
            }
        };

        let stream = StreamSession::start(stream, self.link.clone(), generation, self.config.read_timeout);
        let watcher = ssid.map(|ssid| self.watch_association(generation, ssid.to_string()));
        *self.session.lock().await = Some(WifiSession {
            stream,
            target,
            ssid: ssid.map(str::to_string),
            watcher,
        });

        let name = ssid.map(str::to_string).unwrap_or_else(|| target.to_string());
        if !self.link.mark_connected(generation, name.clone()) {
            return Err(LinkError::Io("connect superseded by disconnect".into()));
        }
        info!("[WiFi] Connected to {} at {}", name, target);

        if let Some(store) = &self.saved {
            store.record_connection(&target.ip().to_string(), target.port(), ssid.map(str::to_string));
        }
        Ok(())
    }

    async fn connect_stream(&self, generation: u64, target: SocketAddr) -> Result<TcpTransportStream, LinkError> {
        info!("[WiFi] Connecting to {}", target);
        let stream = TcpTransportStream::connect(target, self.config.connect_timeout).await?;
        if !self.link.is_current(generation) {
            return Err(LinkError::Io("connect superseded by disconnect".into()));
        }
        Ok(stream)
    }

    async fn release(&self, ssid: &str) {
        if let Err(e) = self.radio.release(ssid).await {
            debug!("[WiFi] could not release {}: {}", ssid, e);
        }
    }

    /// Poll the radio and report the link lost once the vehicle network goes away
    fn watch_association(&self, generation: u64, ssid: String) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let radio = self.radio.clone();
        let link = self.link.clone();
        let period = self.config.association_poll;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match radio.current_ssid().await {
                    Ok(Some(current)) if current == ssid => {}
                    Ok(other) => {
                        if !token.is_cancelled() {
                            debug!("[WiFi] active network is now {:?}", other);
                            link.report_lost(generation, format!("WiFi network {ssid} lost"));
                        }
                        break;
                    }
                    Err(e) => debug!("[WiFi] association check failed: {}", e),
                }
            }
        });
        (cancel, task)
    }

    async fn teardown(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        if let Some((cancel, task)) = session.watcher {
            cancel.cancel();
            join_task(task, "[WiFi] association watcher").await;
        }
        debug!("[WiFi] closing session to {}", session.target);
        session.stream.close().await;

        if let Some(ssid) = session.ssid {
            self.release(&ssid).await;
        }
    }
}

async fn discover(radio: Arc<dyn WifiRadio>) -> Result<Vec<DeviceDescriptor>, ScanFailure> {
    match radio.is_enabled().await {
        Ok(true) => {}
        Ok(false) | Err(RadioError::Disabled) => {
            return Err(ScanFailure::Unavailable("WiFi is disabled".into()))
        }
        Err(RadioError::PermissionDenied(reason)) => return Err(ScanFailure::PermissionDenied(reason)),
        Err(e) => return Err(ScanFailure::Unavailable(e.to_string())),
    }

    let raw = radio.scan().await.map_err(|e| match e {
        RadioError::Disabled => ScanFailure::Unavailable("WiFi is disabled".into()),
        RadioError::PermissionDenied(reason) => ScanFailure::PermissionDenied(reason),
        other => ScanFailure::Failed(other.to_string()),
    })?;

    Ok(raw
        .iter()
        .filter_map(WifiNetwork::classify)
        .take(MAX_WIFI_RESULTS)
        .map(DeviceDescriptor::Wifi)
        .collect())
}

#[async_trait]
impl Transport for WifiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Wifi
    }

    fn link(&self) -> &LinkState {
        &self.link
    }

    async fn initialize(&self) -> bool {
        match timeout(self.config.probe_timeout, self.radio.is_enabled()).await {
            Ok(Ok(enabled)) => enabled,
            Ok(Err(e)) => {
                warn!("[WiFi] radio probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("[WiFi] radio probe timed out");
                false
            }
        }
    }

    fn start_scan(&self, duration: Duration, on_result: ScanCallback) -> ScanAck {
        self.scanner.start(duration, discover(self.radio.clone()), on_result)
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<(), LinkError> {
        self.teardown().await;
        let generation = self.link.begin_session();

        let result = match request {
            ConnectRequest::Identifier(line) => {
                let selection = WifiSelection::from_line(line);
                if selection.ssid.is_empty() {
                    return Err(LinkError::InvalidIdentifier(line.clone()));
                }
                if selection.requires_passphrase {
                    return Err(LinkError::PassphraseRequired { ssid: selection.ssid });
                }
                self.open(generation, Some(&selection.ssid), None, self.config.default_target)
                    .await
            }
            ConnectRequest::WifiNetwork {
                ssid,
                passphrase,
                target,
            } => {
                self.open(generation, Some(ssid), passphrase.as_deref(), *target)
                    .await
            }
            ConnectRequest::Endpoint(target) => self.open(generation, None, None, *target).await,
        };

        if let Err(e) = &result {
            warn!("[WiFi] connect failed: {}", e);
            self.link.mark_disconnected();
            self.teardown().await;
        }
        result
    }

    async fn send(&self, command: &Command) -> Result<(), LinkError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref().filter(|_| self.link.is_connected()) else {
            return Err(LinkError::NotConnected);
        };
        session
            .stream
            .write_line(command, self.config.write_timeout)
            .await?;
        self.link.touch(session.stream.generation());
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
    use crate::scanning::{RawNetwork, ScanReport, ScanStatus};
    use crate::settings::Settings;
    use crate::transport::link::LinkEventReceiver;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};

    #[derive(Default)]
    struct FakeRadio {
        disabled: bool,
        reject_association: bool,
        networks: Vec<RawNetwork>,
        active: StdMutex<Option<String>>,
        released: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl WifiRadio for FakeRadio {
        async fn is_enabled(&self) -> Result<bool, RadioError> {
            Ok(!self.disabled)
        }

        async fn scan(&self) -> Result<Vec<RawNetwork>, RadioError> {
            Ok(self.networks.clone())
        }

        async fn associate(&self, ssid: &str, _passphrase: Option<&str>) -> Result<(), RadioError> {
            if self.reject_association {
                return Err(RadioError::Failed("Secrets were required".into()));
            }
            *self.active.lock().expect("lock") = Some(ssid.to_string());
            Ok(())
        }

        async fn current_ssid(&self) -> Result<Option<String>, RadioError> {
            Ok(self.active.lock().expect("lock").clone())
        }

        async fn release(&self, ssid: &str) -> Result<(), RadioError> {
            self.released.lock().expect("lock").push(ssid.to_string());
            Ok(())
        }
    }

    fn fast_config(target: SocketAddr) -> WifiConfig {
        WifiConfig {
            default_target: target,
            settle_delay: Duration::from_millis(10),
            association_poll: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(2),
            ..WifiConfig::default()
        }
    }

    fn transport(radio: Arc<FakeRadio>, target: SocketAddr) -> (WifiTransport, LinkEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WifiTransport::new(fast_config(target), radio, tx), rx)
    }

    fn raw(ssid: &str, level: i32) -> RawNetwork {
        RawNetwork {
            ssid: ssid.into(),
            level_dbm: level,
            frequency_mhz: 2437,
            capabilities: String::new(),
        }
    }

    async fn scan(transport: &WifiTransport) -> ScanReport {
        let (tx, rx) = oneshot::channel();
        let ack = transport.start_scan(
            Duration::from_secs(10),
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
        );
        assert_eq!(ack, ScanAck::Started);
        rx.await.expect("report")
    }

    #[tokio::test]
    async fn test_open_network_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let target = listener.local_addr().expect("addr");
        let radio = Arc::new(FakeRadio::default());
        let store = Arc::new(SettingsStore::in_memory(Settings::default()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport =
            WifiTransport::new(fast_config(target), radio.clone(), tx).with_saved_connections(store.clone());

        let battery = Arc::new(AtomicU32::new(0));
        let battery_clone = battery.clone();
        transport.set_battery_callback(Arc::new(move |level| {
            battery_clone.store(u32::from(level), Ordering::SeqCst);
        }));

        let line = "RC Car: MyCar_2.4G\n   Strong | 2.4GHz | -45dBm | Open";
        let request = ConnectRequest::Identifier(line.into());
        let (connected, accepted) = tokio::join!(
            transport.connect(&request),
            listener.accept()
        );
        connected.expect("connect");
        let (mut car, _) = accepted.expect("accept");
        assert!(transport.is_connected());
        assert_eq!(transport.device_name().as_deref(), Some("MyCar_2.4G"));

        transport.send(&Command::steering(0.0)).await.expect("send");
        let (read_half, mut write_half) = car.split();
        let mut lines = BufReader::new(read_half).lines();
        assert_eq!(lines.next_line().await.expect("read"), Some("S50".into()));

        write_half.write_all(b"BAT 42\n").await.expect("write");
        for _ in 0..100 {
            if battery.load(Ordering::SeqCst) == 42 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.battery_level(), Some(42));

        let saved = store.saved_connections();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].port, target.port());

        transport.disconnect().await;
        assert!(!transport.is_connected());
        assert_eq!(radio.released.lock().expect("lock").as_slice(), ["MyCar_2.4G"]);
        assert_eq!(
            transport.send(&Command::throttle(10)).await,
            Err(LinkError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_secured_line_requires_passphrase() {
        let radio = Arc::new(FakeRadio::default());
        let (transport, _rx) = transport(radio.clone(), "127.0.0.1:9".parse().expect("addr"));
        let line = "WiFi: Home_WiFi\n   Medium | 5GHz | -65dBm | WPA2";

        let err = transport
            .connect(&ConnectRequest::Identifier(line.into()))
            .await
            .expect_err("needs passphrase");
        assert_eq!(err, LinkError::PassphraseRequired { ssid: "Home_WiFi".into() });
        assert!(radio.active.lock().expect("lock").is_none());
    }

    #[tokio::test]
    async fn test_association_and_tcp_failures_differ() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let closed = listener.local_addr().expect("addr");
        drop(listener);

        let rejecting = Arc::new(FakeRadio {
            reject_association: true,
            ..FakeRadio::default()
        });
        let (transport_a, _rx_a) = transport(rejecting, closed);
        let err = transport_a
            .connect(&ConnectRequest::Identifier("RC Car: Buggy".into()))
            .await
            .expect_err("association fails");
        assert!(matches!(err, LinkError::Association { .. }));

        let (transport_b, _rx_b) = transport(Arc::new(FakeRadio::default()), closed);
        let err = transport_b
            .connect(&ConnectRequest::Identifier("RC Car: Buggy".into()))
            .await
            .expect_err("tcp fails");
        assert!(matches!(err, LinkError::Tcp { .. }));
        assert!(!transport_b.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_failure_releases_joined_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let closed = listener.local_addr().expect("addr");
        drop(listener);

        let radio = Arc::new(FakeRadio::default());
        let (transport, _rx) = transport(radio.clone(), closed);
        let err = transport
            .connect(&ConnectRequest::WifiNetwork {
                ssid: "RC_Car".into(),
                passphrase: Some("secret12".into()),
                target: closed,
            })
            .await
            .expect_err("tcp fails");
        assert!(matches!(err, LinkError::Tcp { .. }));
        assert_eq!(radio.released.lock().expect("lock").as_slice(), ["RC_Car"]);

        // Plain endpoints never joined anything
        let err = transport
            .connect(&ConnectRequest::Endpoint(closed))
            .await
            .expect_err("tcp fails");
        assert!(matches!(err, LinkError::Tcp { .. }));
        assert_eq!(radio.released.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_waits_for_association_watcher() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let target = listener.local_addr().expect("addr");
        let radio = Arc::new(FakeRadio::default());
        let (transport, mut rx) = transport(radio.clone(), target);

        let request = ConnectRequest::WifiNetwork {
            ssid: "RC_Car".into(),
            passphrase: None,
            target,
        };
        let (connected, accepted) = tokio::join!(
            transport.connect(&request),
            listener.accept()
        );
        connected.expect("connect");
        let _car = accepted.expect("accept");

        transport.disconnect().await;
        // Watcher is gone, so a later network change reports nothing
        *radio.active.lock().expect("lock") = Some("Neighbour".into());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(Arc::strong_count(&radio), 2);
    }

    #[tokio::test]
    async fn test_association_loss_reports_link_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let target = listener.local_addr().expect("addr");
        let radio = Arc::new(FakeRadio::default());
        let (transport, mut rx) = transport(radio.clone(), target);

        let request = ConnectRequest::WifiNetwork {
            ssid: "RC_Car".into(),
            passphrase: Some("secret12".into()),
            target,
        };
        let (connected, accepted) = tokio::join!(
            transport.connect(&request),
            listener.accept()
        );
        connected.expect("connect");
        let _car = accepted.expect("accept");

        *radio.active.lock().expect("lock") = Some("Neighbour".into());
        let lost = rx.recv().await.expect("loss reported");
        assert_eq!(lost.kind, TransportKind::Wifi);
        assert!(lost.reason.contains("RC_Car"));
    }

    #[tokio::test]
    async fn test_scan_caps_and_sorts() {
        let mut networks: Vec<RawNetwork> = (0..30).map(|i| raw(&format!("Net{i}"), -60)).collect();
        networks.insert(5, raw("", -30));
        networks.insert(10, raw("esp32_car", -85));
        let radio = Arc::new(FakeRadio {
            networks,
            ..FakeRadio::default()
        });
        let (transport, _rx) = transport(radio, "127.0.0.1:9".parse().expect("addr"));

        let report = scan(&transport).await;
        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.devices.len(), MAX_WIFI_RESULTS);
        assert_eq!(report.devices[0].key(), "esp32_car");
    }

    #[tokio::test]
    async fn test_scan_with_radio_off() {
        let radio = Arc::new(FakeRadio {
            disabled: true,
            ..FakeRadio::default()
        });
        let (transport, _rx) = transport(radio, "127.0.0.1:9".parse().expect("addr"));
        assert!(!transport.initialize().await);

        let report = scan(&transport).await;
        assert_eq!(report.status, ScanStatus::Unavailable("WiFi is disabled".into()));
        assert_eq!(report.lines(), vec!["WiFi is disabled"]);
    }
}
