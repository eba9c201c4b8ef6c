//! BLE transport over GATT
//!
//! After connecting, the first characteristic accepting writes carries
//! commands and the first one that notifies (or indicates) carries
//! telemetry. An unsolicited disconnect seen through the device's property
//! stream is reported as a lost link.

use crate::scanning::{parse_bluetooth_identifier, DeviceDescriptor, ScanCallback, ScanFailure, ScanningCoordinator};
use crate::transport::bt_discovery::BtDiscovery;
use crate::transport::link::{LinkEventSender, LinkState};
use crate::transport::session::join_task;
use crate::transport::traits::{ConnectRequest, LinkError, ScanAck, Transport, TransportKind};
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use rc_link_shared::link::{SIGNAL_INTERVAL_MS, WRITE_TIMEOUT_MS};
use rc_link_shared::{Command, LineDecoder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BleConfig {
    pub scan_duration: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub signal_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(6),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_millis(WRITE_TIMEOUT_MS),
            signal_interval: Duration::from_millis(SIGNAL_INTERVAL_MS),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

struct GattSession {
    generation: u64,
    device: Device,
    write_char: Characteristic,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Characteristics picked for the command channel
struct GattChannels {
    write: Characteristic,
    notify: Option<Characteristic>,
}

pub struct BleTransport {
    config: BleConfig,
    link: Arc<LinkState>,
    scanner: ScanningCoordinator,
    session: Mutex<Option<GattSession>>,
}

impl BleTransport {
    pub fn new(config: BleConfig, events: LinkEventSender) -> Self {
        let link = Arc::new(LinkState::new(TransportKind::Ble, config.signal_interval, events));
        Self {
            config,
            link,
            scanner: ScanningCoordinator::new(TransportKind::Ble),
            session: Mutex::new(None),
        }
    }

    async fn wait_services_resolved(device: &Device, limit: Duration) -> Result<(), LinkError> {
        let deadline = Instant::now() + limit;
        while !device.is_services_resolved().await? {
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout("GATT service discovery".into()));
            }
            sleep(Duration::from_millis(200)).await;
        }
        Ok(())
    }

    async fn find_channels(device: &Device) -> Result<GattChannels, LinkError> {
        let mut write = None;
        let mut notify = None;

        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                let flags = characteristic.flags().await?;
                if write.is_none() && (flags.write || flags.write_without_response) {
                    debug!("[BLE] write characteristic {}", characteristic.uuid().await?);
                    write = Some(characteristic.clone());
                }
                if notify.is_none() && (flags.notify || flags.indicate) {
                    debug!("[BLE] notify characteristic {}", characteristic.uuid().await?);
                    notify = Some(characteristic);
                }
            }
        }

        let write = write.ok_or_else(|| LinkError::Gatt("no writable characteristic".into()))?;
        Ok(GattChannels { write, notify })
    }

    async fn open(&self, generation: u64, device: &Device) -> Result<GattSession, LinkError> {
        if !device.is_connected().await? {
            timeout(self.config.connect_timeout, device.connect())
                .await
                .map_err(|_| LinkError::Timeout(format!("BLE connect to {}", device.address())))??;
        }
        Self::wait_services_resolved(device, self.config.connect_timeout).await?;
        let channels = Self::find_channels(device).await?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if let Some(notify_char) = channels.notify {
            let notifications = notify_char.notify().await?;
            tasks.push(tokio::spawn(notification_loop(
                Box::pin(notifications),
                self.link.clone(),
                generation,
                cancel.clone(),
            )));
        } else {
            warn!("[BLE] no notify characteristic; telemetry disabled");
        }

        let events = device.events().await?;
        tasks.push(tokio::spawn(device_watch(
            Box::pin(events),
            self.link.clone(),
            generation,
            cancel.clone(),
        )));

        Ok(GattSession {
            generation,
            device: device.clone(),
            write_char: channels.write,
            cancel,
            tasks,
        })
    }

    async fn teardown(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        session.cancel.cancel();
        for task in session.tasks {
            join_task(task, "[BLE] session task").await;
        }
        match timeout(Duration::from_secs(2), session.device.disconnect()).await {
            Ok(Ok(())) => debug!("[BLE] disconnected {}", session.device.address()),
            Ok(Err(e)) => debug!("[BLE] disconnect error: {}", e),
            Err(_) => debug!("[BLE] disconnect timed out"),
        }
    }
}

async fn notification_loop(
    mut notifications: std::pin::Pin<Box<dyn futures::Stream<Item = Vec<u8>> + Send>>,
    link: Arc<LinkState>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut decoder = LineDecoder::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            value = notifications.next() => match value {
                Some(data) => {
                    decoder.extend(&data);
                    loop {
                        match decoder.decode_next() {
                            Ok(Some(line)) => link.record_telemetry(generation, &line),
                            Ok(None) => break,
                            Err(e) => warn!("[BLE] dropped inbound data: {}", e),
                        }
                    }
                }
                None => {
                    link.report_lost(generation, "notifications ended");
                    break;
                }
            }
        }
    }
}

async fn device_watch(
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = DeviceEvent> + Send>>,
    link: Arc<LinkState>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))) => {
                    link.report_lost(generation, "device disconnected");
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
    }
}

async fn discover(duration: Duration) -> Result<Vec<DeviceDescriptor>, ScanFailure> {
    let adapter = BtDiscovery::get_adapter().await?;
    let devices = BtDiscovery::discover_le(&adapter, duration).await?;
    Ok(devices.into_iter().map(DeviceDescriptor::Ble).collect())
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn link(&self) -> &LinkState {
        &self.link
    }

    async fn initialize(&self) -> bool {
        BtDiscovery::is_ready(self.config.probe_timeout).await
    }

    fn start_scan(&self, duration: Duration, on_result: ScanCallback) -> ScanAck {
        self.scanner.start(duration, discover(duration), on_result)
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<(), LinkError> {
        let ConnectRequest::Identifier(identifier) = request else {
            return Err(LinkError::Unsupported(TransportKind::Ble));
        };
        let target = parse_bluetooth_identifier(identifier)?;

        self.teardown().await;
        let generation = self.link.begin_session();

        info!("[BLE] Connecting to {}", target.label());
        let adapter = BtDiscovery::get_adapter().await?;
        let device = adapter.device(target.address)?;

        let session = match self.open(generation, &device).await {
            Ok(session) => session,
            Err(e) => {
                warn!("[BLE] connect to {} failed: {}", target.address, e);
                self.link.mark_disconnected();
                let _ = timeout(Duration::from_secs(2), device.disconnect()).await;
                return Err(e);
            }
        };
        *self.session.lock().await = Some(session);

        let name = match device.name().await {
            Ok(Some(name)) => name,
            _ => target.label(),
        };
        if !self.link.mark_connected(generation, name.clone()) {
            self.teardown().await;
            return Err(LinkError::Io("connect superseded by disconnect".into()));
        }
        info!("[BLE] Connected to {}", name);
        Ok(())
    }

    async fn send(&self, command: &Command) -> Result<(), LinkError> {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref().filter(|_| self.link.is_connected()) else {
            return Err(LinkError::NotConnected);
        };

        let frame = command.encode();
        match timeout(self.config.write_timeout, session.write_char.write(&frame)).await {
            Ok(Ok(())) => {
                self.link.touch(session.generation);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(LinkError::Timeout("GATT write".into())),
        }
    }

    async fn disconnect(&self) {
        self.link.mark_disconnected();
        self.teardown().await;
    }
}
