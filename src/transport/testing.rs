//! In-memory transport for exercising the manager and monitor

use crate::scanning::{ScanCallback, ScanningCoordinator};
use crate::transport::link::{LinkEventReceiver, LinkEventSender, LinkState};
use crate::transport::{ConnectRequest, LinkError, ScanAck, Transport, TransportKind};
use async_trait::async_trait;
use rc_link_shared::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct MockTransport {
    link: LinkState,
    scanner: ScanningCoordinator,
    next_connect: Mutex<Option<LinkError>>,
    connect_delay: Mutex<Duration>,
    sent: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new(kind: TransportKind, events: LinkEventSender) -> Arc<Self> {
        Arc::new(Self {
            link: LinkState::new(kind, Duration::from_secs(5), events),
            scanner: ScanningCoordinator::new(kind),
            next_connect: Mutex::new(None),
            connect_delay: Mutex::new(Duration::ZERO),
            sent: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn pair(kind: TransportKind) -> (Arc<Self>, LinkEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(kind, tx), rx)
    }

    pub fn fail_next_connect(&self, error: LinkError) {
        *self.next_connect.lock().expect("lock") = Some(error);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().expect("lock") = delay;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Simulate a line arriving from the vehicle
    pub fn receive(&self, line: &str) {
        self.link.record_telemetry(self.link.generation(), line);
    }

    /// Simulate the receive loop seeing the peer go away
    pub fn drop_link(&self, reason: &str) {
        self.link.report_lost(self.link.generation(), reason);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.link.kind()
    }

    fn link(&self) -> &LinkState {
        &self.link
    }

    async fn initialize(&self) -> bool {
        true
    }

    fn start_scan(&self, duration: Duration, on_result: ScanCallback) -> ScanAck {
        self.scanner.start(duration, async { Ok(Vec::new()) }, on_result)
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<(), LinkError> {
        let generation = self.link.begin_session();
        let delay = *self.connect_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_connect.lock().expect("lock").take() {
            return Err(error);
        }
        if !self.link.mark_connected(generation, request.describe()) {
            return Err(LinkError::Io("connect superseded by disconnect".into()));
        }
        Ok(())
    }

    async fn send(&self, command: &Command) -> Result<(), LinkError> {
        if !self.link.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.sent.lock().expect("lock").push(command.token().to_string());
        self.link.touch(self.link.generation());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.link.mark_disconnected();
    }
}
