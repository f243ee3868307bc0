//! The seam between a [`Session`](crate::Session) and the Bluetooth stack.
//!
//! [`BluestBearer`](crate::bluest_bearer::BluestBearer) talks to real hardware,
//! [`MockBearer`](crate::mock::MockBearer) is an in-memory stand in.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A rule a scanned device has to satisfy to be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    /// Exact advertised local name
    Name(String),
    /// Manufacturer data with this company identifier
    CompanyId(u16),
}

impl ScanFilter {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        match self {
            ScanFilter::Name(name) => advertisement.local_name.as_deref() == Some(name.as_str()),
            ScanFilter::CompanyId(id) => advertisement
                .manufacturer_data
                .as_ref()
                .is_some_and(|m| m.company_id == *id),
        }
    }
}

impl std::fmt::Display for ScanFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanFilter::Name(name) => write!(f, "name={name}"),
            ScanFilter::CompanyId(id) => write!(f, "company=0x{id:04x}"),
        }
    }
}

/// What to look for when requesting a device.
#[derive(Debug, Clone, Default)]
pub struct DeviceRequest {
    /// A device is selected when any filter matches
    pub filters: Vec<ScanFilter>,
    /// Services the session is going to use once connected
    pub optional_services: Vec<Uuid>,
    /// Manufacturer data the session wants to see in advertisements
    pub optional_manufacturer_data: Vec<u16>,
}

impl DeviceRequest {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        self.filters.iter().any(|f| f.matches(advertisement))
    }

    pub fn describe_filters(&self) -> String {
        let filters: Vec<String> = self.filters.iter().map(|f| f.to_string()).collect();
        format!("[{}]", filters.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// One advertisement packet as seen by the scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub manufacturer_data: Option<ManufacturerData>,
    pub rssi: Option<i16>,
}

/// Notified values of one characteristic, in delivery order.
pub type FrameStream = BoxStream<'static, anyhow::Result<Vec<u8>>>;

/// Advertisements of one device, in delivery order.
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Adapt the receiving end of a channel into a stream that ends when all senders are gone.
pub(crate) fn receiver_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// Finds devices.
#[async_trait]
pub trait Bearer: Send + Sync + 'static {
    /// Look for a device matching `request`. `Ok(None)` means nothing was selected.
    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> anyhow::Result<Option<Arc<dyn Peripheral>>>;
}

#[async_trait]
impl<B: Bearer> Bearer for Arc<B> {
    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> anyhow::Result<Option<Arc<dyn Peripheral>>> {
        self.as_ref().request_device(request).await
    }
}

/// A device returned by [`Bearer::request_device`].
#[async_trait]
pub trait Peripheral: Send + Sync {
    fn name(&self) -> Option<String>;

    /// Whether the device offers a GATT server that can be connected to
    fn is_connectable(&self) -> bool;

    async fn connect(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    async fn is_connected(&self) -> bool;

    /// A future that resolves once the link drops, for whatever reason.
    async fn disconnected(&self) -> anyhow::Result<BoxFuture<'static, ()>>;

    async fn services(&self) -> anyhow::Result<Vec<Arc<dyn GattService>>>;

    /// Advertisements received from this device from now on
    async fn advertisements(&self) -> anyhow::Result<AdvertisementStream>;
}

#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn characteristics(&self) -> anyhow::Result<Vec<Arc<dyn GattCharacteristic>>>;
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> anyhow::Result<Vec<u8>>;

    async fn write(&self, value: &[u8]) -> anyhow::Result<()>;

    /// Enable notifications and return the stream of notified values
    async fn subscribe(&self) -> anyhow::Result<FrameStream>;
}

#[test]
fn test_filter_matching() {
    let adv = Advertisement {
        local_name: Some("Motherboard".to_string()),
        manufacturer_data: Some(ManufacturerData {
            company_id: 0x2a29,
            data: vec![],
        }),
        rssi: Some(-60),
    };
    assert!(ScanFilter::Name("Motherboard".to_string()).matches(&adv));
    assert!(!ScanFilter::Name("ENTRALPI".to_string()).matches(&adv));
    assert!(ScanFilter::CompanyId(0x2a29).matches(&adv));
    assert!(!ScanFilter::CompanyId(0x0100).matches(&Advertisement::default()));

    let request = DeviceRequest {
        filters: vec![
            ScanFilter::Name("ENTRALPI".to_string()),
            ScanFilter::CompanyId(0x2a29),
        ],
        ..Default::default()
    };
    assert!(request.matches(&adv));
    assert_eq!(request.describe_filters(), "[name=ENTRALPI, company=0x2a29]");
}
