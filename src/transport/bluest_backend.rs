//! [`BleTransport`] on top of `bluest`.

use std::sync::Mutex;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{BleTransport, DeviceSelector, Notifications, NOTIFICATION_BUFFER};
use crate::error::TransportError;

pub struct BluestTransport {
    adapter: Adapter,
}

impl BluestTransport {
    /// Open the default Bluetooth adapter and wait for it to power on.
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| TransportError::NotFound("default adapter not found".to_owned()))?;
        adapter
            .wait_available()
            .await
            .map_err(|e| TransportError::NotFound(format!("adapter unavailable: {e}")))?;
        Ok(Self { adapter })
    }

    async fn scan_for(&self, selector: &DeviceSelector) -> Result<Option<Device>, bluest::Error> {
        let mut adapter_events = self.adapter.scan(&[]).await?;
        while let Some(advertised) = adapter_events.next().await {
            // The MAC is embedded in the id on Linux and Windows. macOS only
            // exposes an opaque UUID, so there the alias has to match.
            let address = format!("{:?}", advertised.device.id());
            let name = match advertised.adv_data.local_name.clone() {
                Some(name) => Some(name),
                None => advertised.device.name_async().await.ok(),
            };
            if selector.matches(&address, name.as_deref()) {
                info!(name = name.as_deref().unwrap_or(""), address = %address, "found device");
                return Ok(Some(advertised.device));
            }
        }
        Ok(None)
    }
}

pub struct BluestConnection {
    device: Device,
    characteristics: Vec<Characteristic>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BluestConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic, TransportError> {
        self.characteristics
            .iter()
            .find(|c| c.uuid() == uuid)
            .ok_or(TransportError::CharacteristicMissing(uuid))
    }

    fn stop_forwarder(&self) {
        if let Ok(mut forwarder) = self.forwarder.lock() {
            if let Some(task) = forwarder.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl BleTransport for BluestTransport {
    type Device = Device;
    type Connection = BluestConnection;

    async fn discover(&self, selector: &DeviceSelector) -> Result<Device, TransportError> {
        debug!(adapter = %selector.adapter, timeout_s = selector.timeout.as_secs(), "scanning");
        match timeout(selector.timeout, self.scan_for(selector)).await {
            Ok(Ok(Some(device))) => Ok(device),
            Ok(Err(e)) => Err(TransportError::NotFound(format!(
                "{}: scan failed: {e}",
                selector.describe()
            ))),
            Ok(Ok(None)) | Err(_) => Err(TransportError::NotFound(selector.describe())),
        }
    }

    async fn connect(&self, device: &Device) -> Result<BluestConnection, TransportError> {
        let connect_err = |e: bluest::Error| TransportError::Connect(e.to_string());

        self.adapter.connect_device(device).await.map_err(connect_err)?;

        let mut characteristics = Vec::new();
        for service in device.discover_services().await.map_err(connect_err)? {
            characteristics.extend(service.discover_characteristics().await.map_err(connect_err)?);
        }
        debug!(count = characteristics.len(), "discovered characteristics");

        Ok(BluestConnection {
            device: device.clone(),
            characteristics,
            forwarder: Mutex::new(None),
        })
    }

    async fn subscribe(
        &self,
        connection: &BluestConnection,
        characteristic: Uuid,
    ) -> Result<Notifications, TransportError> {
        let notify = connection
            .characteristic(characteristic)
            .map_err(|e| TransportError::Subscribe(e.to_string()))?
            .clone();
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        // The notification stream borrows the characteristic, so both live in the task.
        let task = tokio::spawn(async move {
            let mut reader = match notify.notify().await {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    reader
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            while let Some(item) = reader.next().await {
                match item {
                    Ok(data) => {
                        debug!(rx = %hex::encode(&data), "notification");
                        if tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "notification error");
                        break;
                    }
                }
            }
            debug!("end of notification stream");
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::Subscribe(e)),
            Err(_) => return Err(TransportError::Subscribe("notification task ended".to_owned())),
        }

        connection.stop_forwarder();
        if let Ok(mut forwarder) = connection.forwarder.lock() {
            *forwarder = Some(task);
        }
        info!(characteristic = %characteristic, "subscribed to notifications");
        Ok(rx)
    }

    async fn write(
        &self,
        connection: &BluestConnection,
        characteristic: Option<Uuid>,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let uuid = characteristic.ok_or(TransportError::NoWriteCharacteristic)?;
        let write = connection.characteristic(uuid)?;
        debug!(tx = %hex::encode(data), "write");
        write
            .write(data)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn disconnect(&self, connection: &BluestConnection) {
        connection.stop_forwarder();
        if let Err(e) = self.adapter.disconnect_device(&connection.device).await {
            debug!(error = %e, "disconnect failed");
        }
    }
}
