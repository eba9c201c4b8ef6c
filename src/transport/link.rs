//! Per-transport link bookkeeping shared between the receive loop, the
//! signal monitor and the UI-facing manager
//!
//! Every connect attempt opens a new generation. Background tasks capture the
//! generation they were started for and every write they make is checked
//! against the current one, so a late callback from a torn-down session can
//! never touch the state of its successor.

use crate::signal::SignalStrength;
use crate::transport::traits::TransportKind;
use rc_link_shared::TelemetryFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Single-slot battery subscription
pub type BatteryCallback = Arc<dyn Fn(u8) + Send + Sync>;

const BATTERY_UNKNOWN: u8 = u8::MAX;

/// Report sent to the manager when a transport decides its link is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLost {
    pub kind: TransportKind,
    pub generation: u64,
    pub reason: String,
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkLost>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkLost>;

pub struct LinkState {
    kind: TransportKind,
    connected: AtomicBool,
    generation: AtomicU64,
    epoch: Instant,
    /// Milliseconds since `epoch`; only ever moves forward
    last_communication_ms: AtomicU64,
    battery: AtomicU8,
    signal_interval: Duration,
    peer_name: Mutex<Option<String>>,
    battery_callback: Mutex<Option<BatteryCallback>>,
    events: LinkEventSender,
}

impl LinkState {
    pub fn new(kind: TransportKind, signal_interval: Duration, events: LinkEventSender) -> Self {
        Self {
            kind,
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            epoch: Instant::now(),
            last_communication_ms: AtomicU64::new(0),
            battery: AtomicU8::new(BATTERY_UNKNOWN),
            signal_interval,
            peer_name: Mutex::new(None),
            battery_callback: Mutex::new(None),
            events,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Start a new session generation, invalidating every older one
    pub fn begin_session(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(false, Ordering::SeqCst);
        self.battery.store(BATTERY_UNKNOWN, Ordering::SeqCst);
        generation
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Mark the session live. Call only once its channel handle is stored.
    pub fn mark_connected(&self, generation: u64, peer_name: impl Into<String>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        *self.peer_name.lock().unwrap_or_else(|e| e.into_inner()) = Some(peer_name.into());
        self.reset_communication_clock();
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    /// Drop to disconnected and invalidate the running generation
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.peer_name.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn peer_name(&self) -> Option<String> {
        self.peer_name.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn reset_communication_clock(&self) {
        self.last_communication_ms.fetch_max(self.now_ms(), Ordering::SeqCst);
    }

    /// Record successful traffic for `generation`
    pub fn touch(&self, generation: u64) {
        if self.is_current(generation) {
            self.reset_communication_clock();
        }
    }

    /// Time since the last successful send or receive
    pub fn since_last_communication(&self) -> Duration {
        let last = self.last_communication_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// Handle one telemetry line received on `generation`
    pub fn record_telemetry(&self, generation: u64, line: &str) {
        if !self.is_current(generation) {
            return;
        }
        self.reset_communication_clock();

        let frame = TelemetryFrame::parse(line);
        debug!("[{}] telemetry: {}", self.kind, frame.line);
        if let Some(level) = frame.battery_percent {
            self.battery.store(level, Ordering::SeqCst);
            let callback = self
                .battery_callback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(callback) = callback {
                callback(level);
            }
        }
    }

    pub fn battery_level(&self) -> Option<u8> {
        match self.battery.load(Ordering::SeqCst) {
            BATTERY_UNKNOWN => None,
            level => Some(level),
        }
    }

    pub fn set_battery_callback(&self, callback: BatteryCallback) {
        *self.battery_callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Classify the link by staleness; reports the loss when the link is dead
    pub fn check_signal_strength(&self) -> SignalStrength {
        if !self.is_connected() {
            return SignalStrength::None;
        }
        let elapsed = self.since_last_communication();
        let strength = SignalStrength::classify(elapsed, self.signal_interval);
        if strength == SignalStrength::None {
            self.report_lost(
                self.generation(),
                format!("no data for {:.1}s", elapsed.as_secs_f32()),
            );
        }
        strength
    }

    /// Tell the manager that `generation` lost its link
    pub fn report_lost(&self, generation: u64, reason: impl Into<String>) {
        if !self.is_current(generation) || !self.is_connected() {
            return;
        }
        let reason = reason.into();
        warn!("[{}] link lost: {}", self.kind, reason);
        let _ = self.events.send(LinkLost {
            kind: self.kind,
            generation,
            reason,
        });
    }
}
