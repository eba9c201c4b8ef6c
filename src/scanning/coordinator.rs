//! Runs one discovery at a time per transport and delivers its report

use crate::scanning::{DeviceDescriptor, ScanCallback, ScanReport, ScanStatus};
use crate::transport::{LinkError, ScanAck, TransportKind};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

/// Slack on top of the requested duration before a scan counts as hung
pub const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Why discovery could not produce a device list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanFailure {
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Failed(String),
}

impl From<LinkError> for ScanFailure {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::RadioUnavailable(reason) => ScanFailure::Unavailable(reason),
            LinkError::PermissionDenied(reason) => ScanFailure::PermissionDenied(reason),
            other => ScanFailure::Failed(other.to_string()),
        }
    }
}

impl From<ScanFailure> for ScanStatus {
    fn from(f: ScanFailure) -> Self {
        match f {
            ScanFailure::Unavailable(reason) => ScanStatus::Unavailable(reason),
            ScanFailure::PermissionDenied(reason) => ScanStatus::PermissionDenied(reason),
            ScanFailure::Failed(reason) => ScanStatus::Failed(reason),
        }
    }
}

/// Clears the in-progress flag however the scan task ends
struct InProgress(Arc<AtomicBool>);

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ScanningCoordinator {
    kind: TransportKind,
    in_progress: Arc<AtomicBool>,
    grace: Duration,
}

impl ScanningCoordinator {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            in_progress: Arc::new(AtomicBool::new(false)),
            grace: SCAN_GRACE,
        }
    }

    /// Spawn `discovery` bounded by `duration` plus grace. Returns at once.
    pub fn start<F>(&self, duration: Duration, discovery: F, on_result: ScanCallback) -> ScanAck
    where
        F: Future<Output = Result<Vec<DeviceDescriptor>, ScanFailure>> + Send + 'static,
    {
        let kind = self.kind;
        if self.in_progress.swap(true, Ordering::SeqCst) {
            warn!("[SCAN] {} scan already in progress", kind);
            tokio::spawn(async move {
                on_result(ScanReport::failed(kind, ScanStatus::AlreadyScanning));
            });
            return ScanAck::AlreadyScanning;
        }

        let guard = InProgress(self.in_progress.clone());
        let limit = duration + self.grace;
        info!("[SCAN] Starting {} scan for {:?}", kind, duration);

        tokio::spawn(async move {
            let report = Self::collect(kind, limit, discovery).await;
            info!(
                "[SCAN] {} scan finished: {:?}, {} device(s)",
                kind,
                report.status,
                report.devices.len()
            );
            drop(guard);
            on_result(report);
        });
        ScanAck::Started
    }

    /// Await `discovery` for at most `limit` and shape the outcome
    pub async fn collect<F>(kind: TransportKind, limit: Duration, discovery: F) -> ScanReport
    where
        F: Future<Output = Result<Vec<DeviceDescriptor>, ScanFailure>>,
    {
        match timeout(limit, discovery).await {
            Err(_) => ScanReport::failed(kind, ScanStatus::TimedOut),
            Ok(Err(failure)) => ScanReport::failed(kind, failure.into()),
            Ok(Ok(devices)) => Self::finalize(kind, devices),
        }
    }

    /// De-duplicate (strongest signal wins) and put vehicle-like WiFi
    /// networks first, preserving the order otherwise
    pub fn finalize(kind: TransportKind, devices: Vec<DeviceDescriptor>) -> ScanReport {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<DeviceDescriptor> = Vec::with_capacity(devices.len());

        for device in devices {
            match index.get(&device.key()) {
                Some(&at) => {
                    if device.signal_dbm() > unique[at].signal_dbm() {
                        unique[at] = device;
                    }
                }
                None => {
                    index.insert(device.key(), unique.len());
                    unique.push(device);
                }
            }
        }

        if kind == TransportKind::Wifi {
            unique.sort_by_key(|d| !d.is_rc_like());
        }

        let status = if unique.is_empty() {
            ScanStatus::NothingFound
        } else {
            ScanStatus::Completed
        };
        ScanReport {
            kind,
            devices: unique,
            status,
        }
    }
}
