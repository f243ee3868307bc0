//! In-memory [`Bearer`] for tests and dry runs.
//!
//! Devices are built from the registry with [`MockPeripheral::from_kind`]. Tests then push
//! notifications with [`MockCharacteristic::emit`], broadcast with
//! [`MockPeripheral::advertise`] and inspect what the session wrote.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::bearer::{
    receiver_stream, Advertisement, AdvertisementStream, Bearer, DeviceRequest, FrameStream,
    GattCharacteristic, GattService, ManufacturerData, Peripheral,
};
use crate::device::DeviceKind;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MockBearer {
    peripherals: Mutex<Vec<Arc<MockPeripheral>>>,
    requests: AtomicUsize,
}

impl MockBearer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peripheral(self, peripheral: Arc<MockPeripheral>) -> Self {
        self.add(peripheral);
        self
    }

    pub fn add(&self, peripheral: Arc<MockPeripheral>) {
        lock(&self.peripherals).push(peripheral);
    }

    /// Number of device requests made so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bearer for MockBearer {
    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> anyhow::Result<Option<Arc<dyn Peripheral>>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let found = lock(&self.peripherals)
            .iter()
            .find(|p| request.matches(&p.advertisement))
            .cloned();
        Ok(found.map(|p| p as Arc<dyn Peripheral>))
    }
}

pub struct MockPeripheral {
    advertisement: Advertisement,
    connectable: bool,
    services: Vec<Arc<MockService>>,
    link: watch::Sender<bool>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Advertisement>>>,
    connects: AtomicUsize,
}

impl MockPeripheral {
    pub fn new(name: Option<&str>, company_id: Option<u16>) -> Self {
        Self {
            advertisement: Advertisement {
                local_name: name.map(str::to_string),
                manufacturer_data: company_id.map(|company_id| ManufacturerData {
                    company_id,
                    data: Vec::new(),
                }),
                rssi: Some(-55),
            },
            connectable: true,
            services: Vec::new(),
            link: watch::Sender::new(false),
            listeners: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    /// A device advertising and serving exactly what the registry declares for `kind`
    pub fn from_kind(kind: DeviceKind) -> Self {
        let descriptor = kind.descriptor();
        let mut peripheral = Self::new(descriptor.name, descriptor.company_id);
        for service in descriptor.services {
            let characteristics = service
                .characteristics
                .iter()
                .map(|c| Arc::new(MockCharacteristic::new(c.uuid)))
                .collect();
            peripheral = peripheral.with_service(MockService::new(service.uuid, characteristics));
        }
        peripheral
    }

    pub fn with_service(mut self, service: MockService) -> Self {
        self.services.push(Arc::new(service));
        self
    }

    /// Drop a service, as firmware that lacks it would
    pub fn without_service(mut self, uuid: Uuid) -> Self {
        self.services.retain(|s| s.uuid != uuid);
        self
    }

    pub fn not_connectable(mut self) -> Self {
        self.connectable = false;
        self
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<Arc<MockCharacteristic>> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == uuid)
            .cloned()
    }

    /// Deliver an advertisement to everyone watching this device
    pub fn advertise(&self, advertisement: Advertisement) {
        lock(&self.listeners).retain(|tx| tx.send(advertisement.clone()).is_ok());
    }

    /// Stop advertising: end every advertisement stream
    pub fn go_silent(&self) {
        lock(&self.listeners).clear();
    }

    /// Drop the link from the device side
    pub fn simulate_disconnect(&self) {
        self.link.send_replace(false);
        for service in &self.services {
            for characteristic in &service.characteristics {
                lock(&characteristic.subscribers).clear();
            }
        }
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> anyhow::Result<()> {
        if !*self.link.borrow() {
            bail!("mock peripheral is not connected");
        }
        Ok(())
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    fn name(&self) -> Option<String> {
        self.advertisement.local_name.clone()
    }

    fn is_connectable(&self) -> bool {
        self.connectable
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if !self.connectable {
            bail!("mock peripheral does not accept connections");
        }
        self.link.send_replace(true);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.simulate_disconnect();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    async fn disconnected(&self) -> anyhow::Result<BoxFuture<'static, ()>> {
        let mut rx = self.link.subscribe();
        Ok(async move {
            let _ = rx.wait_for(|connected| !*connected).await;
        }
        .boxed())
    }

    async fn services(&self) -> anyhow::Result<Vec<Arc<dyn GattService>>> {
        self.ensure_connected()?;
        Ok(self
            .services
            .iter()
            .map(|s| s.clone() as Arc<dyn GattService>)
            .collect())
    }

    async fn advertisements(&self) -> anyhow::Result<AdvertisementStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        Ok(receiver_stream(rx))
    }
}

pub struct MockService {
    uuid: Uuid,
    characteristics: Vec<Arc<MockCharacteristic>>,
}

impl MockService {
    pub fn new(uuid: Uuid, characteristics: Vec<Arc<MockCharacteristic>>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

#[async_trait]
impl GattService for MockService {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn characteristics(&self) -> anyhow::Result<Vec<Arc<dyn GattCharacteristic>>> {
        Ok(self
            .characteristics
            .iter()
            .map(|c| c.clone() as Arc<dyn GattCharacteristic>)
            .collect())
    }
}

pub struct MockCharacteristic {
    uuid: Uuid,
    value: Mutex<Vec<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<anyhow::Result<Vec<u8>>>>>,
}

impl MockCharacteristic {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            value: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Set the value returned by reads
    pub fn set_value(&self, value: &[u8]) {
        *lock(&self.value) = value.to_vec();
    }

    /// Notify every subscriber of `value`
    pub fn emit(&self, value: &[u8]) {
        lock(&self.subscribers).retain(|tx| tx.send(Ok(value.to_vec())).is_ok());
    }

    /// Deliver a transport error to every subscriber
    pub fn fail(&self, message: &str) {
        lock(&self.subscribers).retain(|tx| tx.send(Err(anyhow!(message.to_string()))).is_ok());
    }

    /// Everything written so far, oldest first
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.writes).clone()
    }

    pub fn is_subscribed(&self) -> bool {
        !lock(&self.subscribers).is_empty()
    }
}

#[async_trait]
impl GattCharacteristic for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> anyhow::Result<Vec<u8>> {
        Ok(lock(&self.value).clone())
    }

    async fn write(&self, value: &[u8]) -> anyhow::Result<()> {
        lock(&self.writes).push(value.to_vec());
        Ok(())
    }

    async fn subscribe(&self) -> anyhow::Result<FrameStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        Ok(receiver_stream(rx))
    }
}

#[tokio::test]
async fn test_request_by_filter() {
    use crate::bearer::ScanFilter;

    let bearer = MockBearer::new()
        .with_peripheral(Arc::new(MockPeripheral::from_kind(DeviceKind::Entralpi)));
    let request = DeviceRequest {
        filters: vec![ScanFilter::Name("ENTRALPI".to_string())],
        ..Default::default()
    };
    let found = bearer.request_device(&request).await.unwrap();
    assert_eq!(found.unwrap().name().as_deref(), Some("ENTRALPI"));

    let request = DeviceRequest {
        filters: vec![ScanFilter::CompanyId(0x0100)],
        ..Default::default()
    };
    assert!(bearer.request_device(&request).await.unwrap().is_none());
    assert_eq!(bearer.requests(), 2);
}

#[tokio::test]
async fn test_disconnected_future() {
    let peripheral = MockPeripheral::from_kind(DeviceKind::Motherboard);
    peripheral.connect().await.unwrap();
    let disconnected = peripheral.disconnected().await.unwrap();
    peripheral.simulate_disconnect();
    disconnected.await;
    assert!(!peripheral.is_connected().await);
    assert!(peripheral.services().await.is_err());
}
