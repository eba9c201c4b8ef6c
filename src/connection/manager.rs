//! Connection manager: one active transport, one lifecycle, one monitor

use crate::connection::config::ConnectionConfig;
use crate::scanning::{parse_bluetooth_identifier, ScanCallback, ScanReport, ScanStatus, WifiSelection};
use crate::settings::{SavedConnection, SettingsStore};
use crate::signal::{SignalMonitor, SignalMonitorHandle, SignalStrength};
use crate::transport::wifi::NmcliRadio;
use crate::transport::{
    BatteryCallback, BleTransport, ClassicTransport, ConnectRequest, LinkError, LinkEventReceiver, LinkLost,
    ScanAck, Transport, TransportKind, WifiTransport,
};
use rc_link_shared::state_machine::TransitionResult;
use rc_link_shared::{Command, ConnectionState, ConnectionStateMachine, LifecycleEvent};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Link is up and the signal monitor is running
    Connected { transport: TransportKind, device: String },
    /// Link is down; emitted once per teardown of a live or lost link
    Disconnected { reason: String },
    ConnectionFailed { transport: TransportKind, reason: String },
    /// Unsolicited loss; a `Disconnected` follows once cleanup is done
    SignalLost { transport: TransportKind, reason: String },
    /// Result of one signal monitor tick
    Signal(SignalStrength),
    /// Battery reading from telemetry
    Battery { level: u8, low: bool },
    TransportSwitched { from: TransportKind, to: TransportKind },
    /// The selected network is protected; ask for a passphrase and target
    PassphraseRequired { ssid: String },
}

pub type ConnectionEventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;
type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

struct Inner {
    config: ConnectionConfig,
    settings: Arc<SettingsStore>,
    transports: Vec<Arc<dyn Transport>>,
    active: StdMutex<TransportKind>,
    machine: StdMutex<ConnectionStateMachine>,
    /// Serializes connect, disconnect and forced disconnect
    lifecycle: Arc<Mutex<()>>,
    monitor: SignalMonitor,
    monitor_handle: StdMutex<Option<SignalMonitorHandle>>,
    battery_callback: Arc<StdMutex<Option<BatteryCallback>>>,
    events: EventSender,
}

/// Façade the UI drives. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ConnectionManager {
    /// Build the three platform transports. Must run inside a tokio runtime.
    pub fn new(config: ConnectionConfig, settings: Arc<SettingsStore>) -> (Self, ConnectionEventReceiver) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let transports: Vec<Arc<dyn Transport>> = vec![
            Arc::new(BleTransport::new(config.ble(), link_tx.clone())),
            Arc::new(ClassicTransport::new(config.classic(), link_tx.clone())),
            Arc::new(
                WifiTransport::new(config.wifi(), Arc::new(NmcliRadio::default()), link_tx)
                    .with_saved_connections(settings.clone()),
            ),
        ];
        Self::with_transports(config, settings, transports, link_rx)
    }

    /// Build over caller-supplied transports sharing `link_rx`'s channel
    pub fn with_transports(
        config: ConnectionConfig,
        settings: Arc<SettingsStore>,
        transports: Vec<Arc<dyn Transport>>,
        link_rx: LinkEventReceiver,
    ) -> (Self, ConnectionEventReceiver) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(Mutex::new(()));
        let battery_callback: Arc<StdMutex<Option<BatteryCallback>>> = Arc::new(StdMutex::new(None));

        for transport in &transports {
            transport.set_battery_callback(battery_forwarder(
                battery_callback.clone(),
                settings.clone(),
                events.clone(),
            ));
        }

        let active = settings.get().connection_type;
        let inner = Arc::new(Inner {
            monitor: SignalMonitor::new(config.signal_check_period, lifecycle.clone()),
            config,
            settings,
            transports,
            active: StdMutex::new(active),
            machine: StdMutex::new(ConnectionStateMachine::new()),
            lifecycle,
            monitor_handle: StdMutex::new(None),
            battery_callback,
            events,
        });

        tokio::spawn(link_event_loop(Arc::downgrade(&inner), link_rx));
        info!("[CONN] Connection manager ready ({} selected)", active);

        (Self { inner }, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.machine).state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn connection_type(&self) -> TransportKind {
        *lock(&self.inner.active)
    }

    pub fn device_name(&self) -> Option<String> {
        self.inner.active_transport().and_then(|t| t.device_name())
    }

    /// Radio readiness of the selected transport
    pub async fn initialize(&self) -> bool {
        match self.inner.active_transport() {
            Some(transport) => transport.initialize().await,
            None => false,
        }
    }

    /// Scan on the selected transport; `on_result` fires exactly once
    pub fn start_scan(&self, on_result: ScanCallback) -> ScanAck {
        let kind = self.connection_type();
        match self.inner.transport(kind) {
            Some(transport) => transport.start_scan(self.inner.config.scan_duration(kind), on_result),
            None => {
                warn!("[SCAN] no transport registered for {}", kind);
                on_result(ScanReport::failed(
                    kind,
                    ScanStatus::Unavailable(LinkError::Unsupported(kind).to_string()),
                ));
                ScanAck::Started
            }
        }
    }

    /// Connect to a scan line or address on the selected transport
    pub async fn connect(&self, identifier: &str) -> bool {
        self.inner
            .connect_request(ConnectRequest::Identifier(identifier.to_string()))
            .await
    }

    /// Join a (usually protected) WiFi network, then open `ip:port`
    pub async fn connect_wifi(&self, ssid: &str, passphrase: Option<&str>, ip: &str, port: u16) -> bool {
        let Some(target) = self.inner.parse_target(ip, port) else {
            return false;
        };
        self.inner
            .connect_request(ConnectRequest::WifiNetwork {
                ssid: ssid.to_string(),
                passphrase: passphrase.filter(|p| !p.is_empty()).map(str::to_string),
                target,
            })
            .await
    }

    /// Quick reconnect to a saved endpoint on the current network
    pub async fn connect_saved(&self, ip: &str, port: u16) -> bool {
        let Some(target) = self.inner.parse_target(ip, port) else {
            return false;
        };
        self.set_connection_type(TransportKind::Wifi).await;
        self.inner.connect_request(ConnectRequest::Endpoint(target)).await
    }

    /// What selecting a rendered WiFi line requires from the user
    pub fn wifi_selection(&self, line: &str) -> WifiSelection {
        WifiSelection::from_line(line)
    }

    /// Send one command; false when not connected or the write failed
    pub async fn send(&self, command: &Command) -> bool {
        if !lock(&self.inner.machine).can_send() {
            debug!("[CONN] dropping {}: not connected", command);
            return false;
        }
        let Some(transport) = self.inner.active_transport() else {
            return false;
        };
        match transport.send(command).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[CONN] send {} failed: {}", command, e);
                false
            }
        }
    }

    /// Tear down every transport. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.cancel_pending();
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.teardown("disconnected by user").await;
    }

    /// Switch transports, disconnecting first, and persist the choice
    pub async fn set_connection_type(&self, kind: TransportKind) {
        let from = self.connection_type();
        if from == kind {
            return;
        }

        self.inner.cancel_pending();
        {
            let _guard = self.inner.lifecycle.lock().await;
            self.inner.teardown("switching transport").await;
            *lock(&self.inner.active) = kind;
        }

        self.inner.settings.update(|s| s.connection_type = kind);
        info!("[CONN] Transport switched {} -> {}", from, kind);
        self.inner.emit(ConnectionEvent::TransportSwitched { from, to: kind });
    }

    /// Replace the single battery subscriber
    pub fn set_battery_callback(&self, callback: BatteryCallback) {
        *lock(&self.inner.battery_callback) = Some(callback);
    }

    pub fn battery_level(&self) -> Option<u8> {
        self.inner.active_transport().and_then(|t| t.battery_level())
    }

    pub fn saved_connections(&self) -> Vec<SavedConnection> {
        self.inner.settings.saved_connections()
    }

    pub fn remove_saved(&self, ip: &str, port: u16) -> bool {
        self.inner.settings.remove_connection(ip, port)
    }

    pub fn clear_saved(&self) {
        self.inner.settings.clear_connections();
    }

    /// Address of the last Classic peer that connected
    pub fn last_classic_device(&self) -> Option<String> {
        self.inner.settings.get().classic_device_address
    }
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn transport(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.kind() == kind).cloned()
    }

    fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport(*lock(&self.active))
    }

    fn transition(&self, event: LifecycleEvent) -> ConnectionState {
        let (from, result) = {
            let mut machine = lock(&self.machine);
            let from = machine.state();
            (from, machine.process_event(event))
        };
        match result {
            TransitionResult::Success(to) => {
                if from != to {
                    debug!("[CONN] {} -> {}", from, to);
                    self.emit(ConnectionEvent::StateChanged { from, to });
                }
                to
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[CONN] ignored {:?} in state {}", event, from);
                from
            }
        }
    }

    fn parse_target(&self, ip: &str, port: u16) -> Option<SocketAddr> {
        match ip.trim().parse::<IpAddr>() {
            Ok(ip) => Some(SocketAddr::new(ip, port)),
            Err(_) => {
                let error = LinkError::InvalidIdentifier(format!("{ip} is not an IP address"));
                warn!("[CONN] {}", error);
                self.emit(ConnectionEvent::ConnectionFailed {
                    transport: *lock(&self.active),
                    reason: error.to_string(),
                });
                None
            }
        }
    }

    /// Invalidate in-flight connects so they abandon their result
    fn cancel_pending(&self) {
        for transport in &self.transports {
            if !transport.is_connected() {
                transport.link().mark_disconnected();
            }
        }
    }

    async fn connect_request(&self, request: ConnectRequest) -> bool {
        let _guard = self.lifecycle.lock().await;

        let kind = *lock(&self.active);
        let Some(transport) = self.transport(kind) else {
            self.emit(ConnectionEvent::ConnectionFailed {
                transport: kind,
                reason: LinkError::Unsupported(kind).to_string(),
            });
            return false;
        };

        // Never leave a second channel open
        if lock(&self.machine).state() != ConnectionState::Disconnected {
            self.teardown("reconnecting").await;
        }
        for other in self.transports.iter().filter(|t| t.kind() != kind && t.is_connected()) {
            other.disconnect().await;
        }

        self.transition(LifecycleEvent::ConnectRequested);
        info!("[CONN] Connecting via {} to {}", kind, request.describe());

        let result = match timeout(self.config.connect_timeout, transport.connect(&request)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout(format!("{kind} connect"))),
        };

        match result {
            Ok(()) => {
                self.transition(LifecycleEvent::LinkEstablished);
                let device = transport.device_name().unwrap_or_else(|| request.describe());
                info!("[CONN] Connected via {} to {}", kind, device);
                self.emit(ConnectionEvent::Connected {
                    transport: kind,
                    device,
                });
                self.start_monitor(transport);
                if let (TransportKind::Classic, ConnectRequest::Identifier(id)) = (kind, &request) {
                    if let Ok(target) = parse_bluetooth_identifier(id) {
                        self.settings
                            .update(|s| s.classic_device_address = Some(target.address.to_string()));
                    }
                }
                true
            }
            Err(e) => {
                transport.disconnect().await;
                self.transition(LifecycleEvent::ConnectFailed);
                match e {
                    LinkError::PassphraseRequired { ssid } => {
                        info!("[WiFi] {} needs a passphrase", ssid);
                        self.emit(ConnectionEvent::PassphraseRequired { ssid });
                    }
                    e => {
                        warn!("[CONN] {} connect failed: {}", kind, e);
                        self.emit(ConnectionEvent::ConnectionFailed {
                            transport: kind,
                            reason: e.to_string(),
                        });
                    }
                }
                false
            }
        }
    }

    fn start_monitor(&self, transport: Arc<dyn Transport>) {
        let events = self.events.clone();
        let handle = self.monitor.start(transport, move |strength| {
            let _ = events.send(ConnectionEvent::Signal(strength));
        });
        if let Some(previous) = lock(&self.monitor_handle).replace(handle) {
            previous.stop();
        }
    }

    fn stop_monitor(&self) {
        if let Some(handle) = lock(&self.monitor_handle).take() {
            handle.stop();
        }
    }

    /// Full teardown. Caller holds the lifecycle lock.
    async fn teardown(&self, reason: &str) {
        self.stop_monitor();
        for transport in &self.transports {
            transport.disconnect().await;
        }

        let was = lock(&self.machine).state();
        self.transition(LifecycleEvent::DisconnectRequested);
        if was != ConnectionState::Disconnected {
            info!("[CONN] Disconnected: {}", reason);
            self.emit(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    async fn handle_link_lost(&self, lost: LinkLost) {
        let _guard = self.lifecycle.lock().await;

        let active = *lock(&self.active);
        let live = lost.kind == active
            && self
                .transport(lost.kind)
                .is_some_and(|t| t.link().is_current(lost.generation))
            && lock(&self.machine).state() == ConnectionState::Connected;
        if !live {
            debug!("[SIGNAL] ignoring stale loss report from {}: {}", lost.kind, lost.reason);
            return;
        }

        warn!("[SIGNAL] {} signal lost: {}", lost.kind, lost.reason);
        self.transition(LifecycleEvent::SignalLost);
        self.emit(ConnectionEvent::SignalLost {
            transport: lost.kind,
            reason: lost.reason.clone(),
        });

        self.stop_monitor();
        for transport in &self.transports {
            transport.disconnect().await;
        }
        self.transition(LifecycleEvent::CleanupComplete);
        self.emit(ConnectionEvent::Disconnected {
            reason: format!("signal lost: {}", lost.reason),
        });
    }
}

/// Routes loss reports from every transport into the lifecycle
async fn link_event_loop(inner: Weak<Inner>, mut link_rx: LinkEventReceiver) {
    while let Some(lost) = link_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_link_lost(lost).await;
    }
    debug!("[CONN] link event loop finished");
}

fn battery_forwarder(
    slot: Arc<StdMutex<Option<BatteryCallback>>>,
    settings: Arc<SettingsStore>,
    events: EventSender,
) -> BatteryCallback {
    Arc::new(move |level| {
        let low = settings.get().is_battery_low(level);
        if low {
            warn!("[CONN] Battery low: {}%", level);
        }
        let _ = events.send(ConnectionEvent::Battery { level, low });
        let callback = lock(&slot).clone();
        if let Some(callback) = callback {
            callback(level);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::transport::testing::MockTransport;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Harness {
        manager: ConnectionManager,
        events: ConnectionEventReceiver,
        ble: Arc<MockTransport>,
        classic: Arc<MockTransport>,
        wifi: Arc<MockTransport>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_settings(Settings::default())
        }

        fn with_settings(settings: Settings) -> Self {
            let (link_tx, link_rx) = mpsc::unbounded_channel();
            let ble = MockTransport::new(TransportKind::Ble, link_tx.clone());
            let classic = MockTransport::new(TransportKind::Classic, link_tx.clone());
            let wifi = MockTransport::new(TransportKind::Wifi, link_tx);
            let transports: Vec<Arc<dyn Transport>> = vec![ble.clone(), classic.clone(), wifi.clone()];

            let (manager, events) = ConnectionManager::with_transports(
                ConnectionConfig::default(),
                Arc::new(SettingsStore::in_memory(settings)),
                transports,
                link_rx,
            );
            Self {
                manager,
                events,
                ble,
                classic,
                wifi,
            }
        }

        fn drain(&mut self) -> Vec<ConnectionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn connected_count(&self) -> usize {
            [&self.ble, &self.classic, &self.wifi]
                .iter()
                .filter(|t| t.is_connected())
                .count()
        }

        async fn wait_for(&mut self, wanted: impl Fn(&ConnectionEvent) -> bool) -> ConnectionEvent {
            loop {
                let event = self.events.recv().await.expect("event stream open");
                if wanted(&event) {
                    return event;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_connect_send_disconnect() {
        let mut h = Harness::new();
        assert!(h.manager.connect("RC_Car_BLE (AA:BB:CC:11:22:33)").await);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.manager.device_name().as_deref(), Some("RC_Car_BLE (AA:BB:CC:11:22:33)"));

        assert!(h.manager.send(&Command::steering(-90.0)).await);
        assert!(h.manager.send(&Command::throttle(40)).await);
        assert_eq!(h.ble.sent(), vec!["S00", "G40"]);

        h.manager.disconnect().await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        let events = h.drain();
        assert!(events.contains(&ConnectionEvent::Connected {
            transport: TransportKind::Ble,
            device: "RC_Car_BLE (AA:BB:CC:11:22:33)".into(),
        }));
        assert!(matches!(events.last(), Some(ConnectionEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_failed_connect_ends_disconnected() {
        let mut h = Harness::new();
        h.ble.fail_next_connect(LinkError::DeviceNotFound("AA:BB".into()));

        assert!(!h.manager.connect("car (AA:BB:CC:11:22:33)").await);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connected_count(), 0);
        assert!(h.ble.disconnect_count() >= 1);

        let events = h.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            ConnectionEvent::ConnectionFailed { transport: TransportKind::Ble, .. }
        )));
        assert!(!events.iter().any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_send_rejected_when_disconnected() {
        let h = Harness::new();
        assert!(!h.manager.send(&Command::horn(true)).await);
        assert!(h.ble.sent().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut h = Harness::new();
        h.manager.disconnect().await;
        h.manager.disconnect().await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(h.drain().is_empty());

        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);
        h.manager.disconnect().await;
        h.manager.disconnect().await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        let disconnects = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ConnectionEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_switching_type_disconnects_first() {
        let mut h = Harness::new();
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);

        h.manager.set_connection_type(TransportKind::Wifi).await;
        assert_eq!(h.manager.connection_type(), TransportKind::Wifi);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connected_count(), 0);

        assert!(h.manager.connect("RC Car: MyCar").await);
        assert!(h.wifi.is_connected());
        assert_eq!(h.connected_count(), 1);

        let events = h.drain();
        assert!(events.contains(&ConnectionEvent::TransportSwitched {
            from: TransportKind::Ble,
            to: TransportKind::Wifi,
        }));
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_previous_link() {
        let h = Harness::new();
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);
        let before = h.ble.disconnect_count();
        assert!(h.manager.connect("other (AA:BB:CC:44:55:66)").await);
        assert!(h.ble.disconnect_count() > before);
        assert_eq!(h.connected_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_forces_disconnect() {
        let mut h = Harness::new();
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);

        let event = h
            .wait_for(|e| matches!(e, ConnectionEvent::SignalLost { .. }))
            .await;
        assert!(matches!(
            event,
            ConnectionEvent::SignalLost { transport: TransportKind::Ble, .. }
        ));
        h.wait_for(|e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(!h.ble.is_connected());
        assert!(!h.manager.send(&Command::steering(0.0)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_publishes_signal_tiers() {
        let mut h = Harness::new();
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);

        let first = h.wait_for(|e| matches!(e, ConnectionEvent::Signal(_))).await;
        assert_eq!(first, ConnectionEvent::Signal(SignalStrength::Strong));
        let weak = h
            .wait_for(|e| matches!(e, ConnectionEvent::Signal(s) if *s != SignalStrength::Strong))
            .await;
        assert_eq!(weak, ConnectionEvent::Signal(SignalStrength::Weak));
    }

    #[tokio::test]
    async fn test_peer_drop_routes_through_signal_lost() {
        let mut h = Harness::new();
        h.manager.set_connection_type(TransportKind::Classic).await;
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);

        assert_eq!(
            h.manager.inner.settings.get().classic_device_address.as_deref(),
            Some("AA:BB:CC:11:22:33")
        );

        h.classic.drop_link("connection closed by peer");
        h.wait_for(|e| matches!(e, ConnectionEvent::SignalLost { .. })).await;
        h.wait_for(|e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_loss_report_ignored() {
        let mut h = Harness::new();
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);
        let old_generation = h.ble.link().generation();
        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);

        // A loss for the torn-down session must not touch the new one
        h.ble.link().report_lost(old_generation, "late");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert!(!h.drain().iter().any(|e| matches!(e, ConnectionEvent::SignalLost { .. })));
    }

    #[tokio::test]
    async fn test_secured_wifi_asks_for_passphrase() {
        let mut h = Harness::with_settings(Settings {
            connection_type: TransportKind::Wifi,
            ..Settings::default()
        });
        h.wifi.fail_next_connect(LinkError::PassphraseRequired {
            ssid: "Home_WiFi".into(),
        });

        let line = "WiFi: Home_WiFi\n   Medium | 5GHz | -65dBm | WPA2";
        let selection = h.manager.wifi_selection(line);
        assert!(selection.requires_passphrase);
        assert!(!h.manager.connect(line).await);
        assert!(h.drain().contains(&ConnectionEvent::PassphraseRequired {
            ssid: "Home_WiFi".into()
        }));

        assert!(h.manager.connect_wifi("Home_WiFi", Some("secret12"), "192.168.4.1", 80).await);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_invalid_target_ip_rejected() {
        let mut h = Harness::new();
        assert!(!h.manager.connect_saved("not.an.ip", 80).await);
        assert!(matches!(
            h.drain().as_slice(),
            [ConnectionEvent::ConnectionFailed { .. }]
        ));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_saved_endpoint_selects_wifi() {
        let h = Harness::new();
        assert!(h.manager.connect_saved("192.168.4.1", 80).await);
        assert_eq!(h.manager.connection_type(), TransportKind::Wifi);
        assert!(h.wifi.is_connected());
        assert_eq!(h.manager.device_name().as_deref(), Some("192.168.4.1:80"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_connect() {
        let h = Harness::new();
        h.ble.set_connect_delay(Duration::from_secs(5));

        let manager = h.manager.clone();
        let pending = tokio::spawn(async move { manager.connect("car (AA:BB:CC:11:22:33)").await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.manager.disconnect().await;

        assert!(!pending.await.expect("join"));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_battery_reaches_subscriber_with_low_flag() {
        let mut h = Harness::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        h.manager.set_battery_callback(Arc::new(move |level| {
            seen_clone.store(u32::from(level), Ordering::SeqCst);
        }));

        assert!(h.manager.connect("car (AA:BB:CC:11:22:33)").await);
        h.ble.receive("BAT 25");
        assert_eq!(seen.load(Ordering::SeqCst), 25);
        assert_eq!(h.manager.battery_level(), Some(25));
        assert!(h.drain().contains(&ConnectionEvent::Battery { level: 25, low: true }));
    }

    #[tokio::test]
    async fn test_scan_uses_selected_transport() {
        let h = Harness::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let ack = h.manager.start_scan(Box::new(move |report| {
            let _ = tx.send(report);
        }));
        assert_eq!(ack, ScanAck::Started);
        let report = rx.await.expect("report");
        assert_eq!(report.kind, TransportKind::Ble);
    }
}
