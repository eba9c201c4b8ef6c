//! Signal Monitor
//!
//! Runs a background task that periodically classifies the active link by
//! staleness. A dead link is reported by the transport itself through its
//! link-loss channel; the monitor only drives the evaluation and publishes
//! each tier to the caller.

use crate::signal::SignalStrength;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SignalMonitor {
    period: Duration,
    /// Held for each evaluation so a tick never overlaps a teardown
    lifecycle: Arc<Mutex<()>>,
}

impl SignalMonitor {
    pub fn new(period: Duration, lifecycle: Arc<Mutex<()>>) -> Self {
        Self { period, lifecycle }
    }

    /// Start monitoring `transport`, calling `on_tick` with every evaluation
    pub fn start<F>(&self, transport: Arc<dyn Transport>, on_tick: F) -> SignalMonitorHandle
    where
        F: Fn(SignalStrength) + Send + Sync + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let lifecycle = self.lifecycle.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let _guard = lifecycle.lock().await;
                if token.is_cancelled() {
                    break;
                }
                if !transport.is_connected() {
                    continue;
                }

                let strength = transport.check_signal_strength();
                debug!("[SIGNAL] {} link: {}", transport.kind(), strength);
                on_tick(strength);
            }

            info!("[SIGNAL] Monitoring stopped");
        });

        SignalMonitorHandle { cancel, task }
    }
}

/// Handle to stop signal monitoring; dropping it stops the task too
pub struct SignalMonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SignalMonitorHandle {
    /// Stop without waiting. Safe to call while holding the lifecycle lock.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SignalMonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
