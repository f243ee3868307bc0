//! [`Bearer`] over the host's Bluetooth adapter, using `bluest`.
//!
//! `bluest` streams borrow the adapter or characteristic they came from, so each one is
//! driven by a spawned task that owns a clone of its handle and forwards into a channel.
//! The task ends when the receiving side is dropped.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, ConnectionEvent, Device, Service};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bearer::{
    receiver_stream, Advertisement, AdvertisementStream, Bearer, DeviceRequest, FrameStream,
    GattCharacteristic, GattService, ManufacturerData, Peripheral,
};

fn advertisement(found: &AdvertisingDevice) -> Advertisement {
    Advertisement {
        local_name: found
            .adv_data
            .local_name
            .clone()
            .or_else(|| found.device.name().ok()),
        manufacturer_data: found
            .adv_data
            .manufacturer_data
            .as_ref()
            .map(|m| ManufacturerData {
                company_id: m.company_id,
                data: m.data.clone(),
            }),
        rssi: found.rssi,
    }
}

/// The default adapter of the host.
#[derive(Clone)]
pub struct BluestBearer {
    adapter: Adapter,
}

impl BluestBearer {
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;
        Ok(Self { adapter })
    }
}

#[async_trait]
impl Bearer for BluestBearer {
    /// Scan until a matching device shows up. The session bounds the scan with its timeout.
    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> anyhow::Result<Option<Arc<dyn Peripheral>>> {
        let mut scan = self.adapter.scan(&[]).await?;
        while let Some(found) = scan.next().await {
            let advertisement = advertisement(&found);
            if request.matches(&advertisement) {
                debug!(id = %found.device.id(), name = ?advertisement.local_name, "device selected");
                return Ok(Some(Arc::new(BluestPeripheral {
                    adapter: self.adapter.clone(),
                    device: found.device,
                    advertisement,
                    connectable: found.adv_data.is_connectable,
                })));
            }
        }
        Ok(None)
    }
}

struct BluestPeripheral {
    adapter: Adapter,
    device: Device,
    advertisement: Advertisement,
    connectable: bool,
}

#[async_trait]
impl Peripheral for BluestPeripheral {
    fn name(&self) -> Option<String> {
        self.advertisement.local_name.clone()
    }

    fn is_connectable(&self) -> bool {
        self.connectable
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if self.device.is_connected().await {
            return Ok(());
        }
        let mut retries = 2;
        loop {
            match self.adapter.connect_device(&self.device).await {
                Ok(()) => return Ok(()),
                Err(err) if retries > 0 => {
                    debug!("Failed to connect: {err}");
                    retries -= 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn disconnected(&self) -> anyhow::Result<BoxFuture<'static, ()>> {
        let adapter = self.adapter.clone();
        let device = self.device.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (gone_tx, gone_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut events = match adapter.device_connection_events(&device).await {
                Ok(events) => {
                    let _ = ready_tx.send(Ok(()));
                    events
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if matches!(event, ConnectionEvent::Disconnected) {
                    break;
                }
            }
            let _ = gone_tx.send(());
        });
        ready_rx.await.map_err(|_| anyhow!("connection event task ended"))??;
        Ok(gone_rx.map(|_| ()).boxed())
    }

    async fn services(&self) -> anyhow::Result<Vec<Arc<dyn GattService>>> {
        let services = self.device.discover_services().await?;
        Ok(services
            .into_iter()
            .map(|service| Arc::new(BluestService { service }) as Arc<dyn GattService>)
            .collect())
    }

    async fn advertisements(&self) -> anyhow::Result<AdvertisementStream> {
        let adapter = self.adapter.clone();
        let id = self.device.id();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut scan = match adapter.scan(&[]).await {
                Ok(scan) => scan,
                Err(err) => {
                    warn!("Failed to scan for advertisements: {err}");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    found = scan.next() => match found {
                        Some(found) if found.device.id() == id => {
                            if tx.send(advertisement(&found)).is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });
        Ok(receiver_stream(rx))
    }
}

struct BluestService {
    service: Service,
}

#[async_trait]
impl GattService for BluestService {
    fn uuid(&self) -> Uuid {
        self.service.uuid()
    }

    async fn characteristics(&self) -> anyhow::Result<Vec<Arc<dyn GattCharacteristic>>> {
        let characteristics = self.service.discover_characteristics().await?;
        Ok(characteristics
            .into_iter()
            .map(|characteristic| {
                Arc::new(BluestCharacteristic { characteristic }) as Arc<dyn GattCharacteristic>
            })
            .collect())
    }
}

struct BluestCharacteristic {
    characteristic: Characteristic,
}

#[async_trait]
impl GattCharacteristic for BluestCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid()
    }

    async fn read(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.characteristic.read().await?)
    }

    async fn write(&self, value: &[u8]) -> anyhow::Result<()> {
        self.characteristic.write(value).await?;
        Ok(())
    }

    async fn subscribe(&self) -> anyhow::Result<FrameStream> {
        let characteristic = self.characteristic.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut notifications = match characteristic.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    item = notifications.next() => match item {
                        Some(item) => {
                            if tx.send(item.map_err(anyhow::Error::from)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        ready_rx.await.map_err(|_| anyhow!("notification task ended"))??;
        Ok(receiver_stream(rx))
    }
}
