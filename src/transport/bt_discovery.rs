//! Bluetooth adapter access and device discovery (BlueZ via bluer)

use crate::scanning::BluetoothDevice;
use crate::transport::traits::LinkError;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

pub const BLUETOOTH_DISABLED: &str = "Bluetooth is disabled - please enable Bluetooth";

/// Bluetooth device discovery service
pub struct BtDiscovery;

impl BtDiscovery {
    /// Default adapter, provided it is powered
    pub async fn get_adapter() -> Result<Adapter, LinkError> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        if !adapter.is_powered().await? {
            return Err(LinkError::RadioUnavailable(BLUETOOTH_DISABLED.into()));
        }
        Ok(adapter)
    }

    /// Readiness probe bounded by `limit`
    pub async fn is_ready(limit: Duration) -> bool {
        match timeout(limit, Self::get_adapter()).await {
            Ok(Ok(adapter)) => {
                debug!("[BT] adapter {} ready", adapter.name());
                true
            }
            Ok(Err(e)) => {
                info!("[BT] adapter not ready: {}", e);
                false
            }
            Err(_) => {
                info!("[BT] adapter probe timed out");
                false
            }
        }
    }

    /// Low-energy discovery for `duration`; each address reported once
    pub async fn discover_le(adapter: &Adapter, duration: Duration) -> Result<Vec<BluetoothDevice>, LinkError> {
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                ..Default::default()
            })
            .await?;

        let discover = adapter.discover_devices().await?;
        tokio::pin!(discover);

        let mut seen: HashSet<Address> = HashSet::new();
        let mut order = Vec::new();

        // Discovery runs until the deadline; the timeout is the normal exit
        let _ = timeout(duration, async {
            while let Some(evt) = discover.next().await {
                if let AdapterEvent::DeviceAdded(addr) = evt {
                    if seen.insert(addr) {
                        order.push(addr);
                    }
                }
            }
        })
        .await;
        info!("[BLE] Discovery finished: {} device(s)", order.len());

        let mut devices = Vec::with_capacity(order.len());
        for addr in order {
            devices.push(Self::describe(adapter, addr).await?);
        }
        Ok(devices)
    }

    /// Devices bonded with this host
    pub async fn paired_devices(adapter: &Adapter) -> Result<Vec<BluetoothDevice>, LinkError> {
        let mut devices = Vec::new();
        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if device.is_paired().await.unwrap_or(false) {
                devices.push(Self::describe(adapter, addr).await?);
            }
        }
        info!("[BT] {} paired device(s)", devices.len());
        Ok(devices)
    }

    async fn describe(adapter: &Adapter, addr: Address) -> Result<BluetoothDevice, LinkError> {
        let device = adapter.device(addr)?;
        Ok(BluetoothDevice {
            name: device.name().await.ok().flatten(),
            address: addr,
            rssi: device.rssi().await.ok().flatten(),
        })
    }
}

