//! Connection lifecycle: select a device, resolve its services, pump notifications into the
//! decoder and hand decoded values to the notify callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::bearer::{
    AdvertisementStream, Bearer, DeviceRequest, FrameStream, GattCharacteristic, Peripheral,
};
use crate::calibration::Calibration;
use crate::config::SessionConfig;
use crate::device::{ids, DeviceKind};
use crate::error::{Error, Result};
use crate::measurement::{Notification, NotificationValue};
use crate::protocol::Decoder;

/// Receives every decoded value, on the task that decoded it.
pub type NotifyCallback = Arc<dyn Fn(Notification) + Send + Sync>;

/// Source of values decoded from advertisements
pub const ADVERTISEMENT_SOURCE: &str = "advertisement";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A characteristic bound during connect, by logical ids.
pub(crate) struct Bound {
    pub(crate) service: &'static str,
    pub(crate) characteristic: &'static str,
    pub(crate) handle: Arc<dyn GattCharacteristic>,
}

/// Everything that exists only while a device is connected.
pub(crate) struct Link {
    pub(crate) kind: DeviceKind,
    generation: u64,
    peripheral: Arc<dyn Peripheral>,
    pub(crate) bound: Vec<Bound>,
    pub(crate) decoder: Decoder,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    pub(crate) fn characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Option<Arc<dyn GattCharacteristic>> {
        self.bound
            .iter()
            .find(|b| b.service == service && b.characteristic == characteristic)
            .map(|b| b.handle.clone())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

enum Slot {
    Idle,
    Connecting,
    Connected(Link),
}

pub(crate) struct Shared {
    slot: Slot,
    /// Bumped on every connect so tasks of an older link leave a newer one alone
    generation: u64,
    pub(crate) calibration: Calibration,
    callback: Option<NotifyCallback>,
    retain_calibration: bool,
}

/// Puts the slot back to idle if a connect fails or is cancelled half way.
struct ConnectAttempt<'a> {
    shared: &'a Mutex<Shared>,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        let mut shared = lock(self.shared);
        if matches!(shared.slot, Slot::Connecting) {
            shared.slot = Slot::Idle;
        }
    }
}

struct Resolved {
    bound: Vec<Bound>,
    subscriptions: Vec<(String, FrameStream)>,
}

/// A connection to one hangboard or scale.
///
/// At most one device is connected at a time. All state, including the calibration table
/// and the notify callback, belongs to the session, so several sessions can run side by side.
pub struct Session<B: Bearer> {
    bearer: B,
    config: SessionConfig,
    shared: Arc<Mutex<Shared>>,
}

impl<B: Bearer> Session<B> {
    pub fn new(bearer: B) -> Self {
        Self::with_config(bearer, SessionConfig::default())
    }

    pub fn with_config(bearer: B, config: SessionConfig) -> Self {
        let shared = Shared {
            slot: Slot::Idle,
            generation: 0,
            calibration: Calibration::new(),
            callback: None,
            retain_calibration: config.retain_calibration,
        };
        Self {
            bearer,
            config,
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    /// Run `f` against the current link.
    pub(crate) fn with_link<R>(
        &self,
        f: impl FnOnce(&mut Link, &mut Calibration) -> R,
    ) -> Result<R> {
        let mut guard = self.lock();
        let Shared {
            slot, calibration, ..
        } = &mut *guard;
        match slot {
            Slot::Connected(link) => Ok(f(link, calibration)),
            _ => Err(Error::NotConnected),
        }
    }

    /// Find and connect to a device of the given kind.
    ///
    /// For GATT devices this resolves the declared services and subscribes to the `rx`
    /// characteristic. Advertising only devices are watched instead.
    pub async fn connect(&self, kind: DeviceKind) -> Result<()> {
        {
            let mut shared = self.lock();
            if !matches!(shared.slot, Slot::Idle) {
                return Err(Error::AlreadyConnected);
            }
            shared.slot = Slot::Connecting;
        }
        let _attempt = ConnectAttempt {
            shared: &self.shared,
        };

        let descriptor = kind.descriptor();
        let request = DeviceRequest {
            filters: descriptor.filters(),
            optional_services: descriptor.service_uuids(),
            optional_manufacturer_data: descriptor
                .company_id
                .filter(|_| kind.is_advertising_only())
                .into_iter()
                .collect(),
        };
        let filters = request.describe_filters();
        info!(device = %kind, %filters, "requesting device");

        let scan = timeout(self.config.scan_timeout(), self.bearer.request_device(&request));
        let selected = match scan.await {
            Ok(selected) => selected.with_context(|| format!("requesting device {filters}"))?,
            Err(_) => {
                debug!(%filters, "scan timed out");
                None
            }
        };
        let Some(peripheral) = selected else {
            return Err(Error::NoDeviceSelected { filters });
        };
        let name = peripheral.name().unwrap_or_else(|| kind.to_string());

        if kind.is_advertising_only() {
            let advertisements = peripheral
                .advertisements()
                .await
                .with_context(|| format!("watching advertisements of {name}"))?;
            let resolved = Resolved {
                bound: Vec::new(),
                subscriptions: Vec::new(),
            };
            self.activate(kind, peripheral, resolved, None, Some(advertisements));
            info!(device = %kind, %name, "listening for advertisements");
            return Ok(());
        }

        if !peripheral.is_connectable() {
            return Err(Error::BearerUnavailable { device: name });
        }
        peripheral
            .connect()
            .await
            .with_context(|| format!("connecting to {name}"))?;

        let observed = self.observe_and_resolve(kind, peripheral.as_ref()).await;
        let (disconnected, resolved) = match observed {
            Ok(observed) => observed,
            Err(err) => {
                if let Err(close) = peripheral.disconnect().await {
                    debug!("closing after failed connect: {close:#}");
                }
                return Err(err);
            }
        };
        self.activate(kind, peripheral, resolved, Some(disconnected), None);
        info!(device = %kind, %name, "connected");
        Ok(())
    }

    async fn observe_and_resolve(
        &self,
        kind: DeviceKind,
        peripheral: &dyn Peripheral,
    ) -> Result<(BoxFuture<'static, ()>, Resolved)> {
        let disconnected = peripheral
            .disconnected()
            .await
            .context("registering disconnect observer")?;
        let resolved = self.resolve(kind, peripheral).await?;
        Ok((disconnected, resolved))
    }

    /// Bind the declared characteristics of every declared service the device offers.
    async fn resolve(&self, kind: DeviceKind, peripheral: &dyn Peripheral) -> Result<Resolved> {
        let services = peripheral.services().await.context("listing services")?;
        if services.is_empty() {
            return Err(Error::NoServices);
        }

        let mut resolved = Resolved {
            bound: Vec::new(),
            subscriptions: Vec::new(),
        };
        for declared in kind.descriptor().services {
            let Some(service) = services.iter().find(|s| s.uuid() == declared.uuid) else {
                debug!(service = declared.id, "service not offered");
                continue;
            };
            let settle = self.config.settle_delay();
            if !settle.is_zero() {
                sleep(settle).await;
            }
            let offered = service
                .characteristics()
                .await
                .with_context(|| format!("listing characteristics of service {}", declared.id))?;

            for wanted in declared.characteristics {
                let Some(handle) = offered.iter().find(|c| c.uuid() == wanted.uuid) else {
                    warn!(
                        service = declared.id,
                        characteristic = wanted.id,
                        uuid = %wanted.uuid,
                        "characteristic not found"
                    );
                    continue;
                };
                if wanted.id == ids::RX {
                    let frames = handle.subscribe().await.with_context(|| {
                        format!("subscribing to {}.{}", declared.id, wanted.id)
                    })?;
                    resolved.subscriptions.push((wanted.uuid.to_string(), frames));
                }
                resolved.bound.push(Bound {
                    service: declared.id,
                    characteristic: wanted.id,
                    handle: handle.clone(),
                });
            }
        }
        Ok(resolved)
    }

    fn activate(
        &self,
        kind: DeviceKind,
        peripheral: Arc<dyn Peripheral>,
        resolved: Resolved,
        disconnected: Option<BoxFuture<'static, ()>>,
        advertisements: Option<AdvertisementStream>,
    ) {
        let mut shared = self.lock();
        shared.generation += 1;
        let generation = shared.generation;
        let state = Arc::downgrade(&self.shared);

        let mut tasks = Vec::new();
        for (source, frames) in resolved.subscriptions {
            tasks.push(tokio::spawn(pump(state.clone(), generation, source, frames)));
        }
        if let Some(advertisements) = advertisements {
            let liveness = self.config.liveness_timeout();
            tasks.push(tokio::spawn(watch_advertisements(
                state.clone(),
                generation,
                liveness,
                advertisements,
            )));
        }
        if let Some(disconnected) = disconnected {
            tasks.push(tokio::spawn(observe_disconnect(state, generation, disconnected)));
        }

        shared.slot = Slot::Connected(Link {
            kind,
            generation,
            peripheral,
            bound: resolved.bound,
            decoder: Decoder::new(kind, self.config.tare_duration()),
            tasks,
        });
    }

    /// Close the connection. Does nothing when not connected.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(link) = release(&self.shared, None) else {
            return Ok(());
        };
        let kind = link.kind;
        let peripheral = link.peripheral.clone();
        drop(link);

        info!(device = %kind, "disconnecting");
        if !kind.is_advertising_only() {
            peripheral.disconnect().await.context("disconnecting")?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.lock().slot, Slot::Connected(_))
    }

    /// The kind of the connected device
    pub fn device(&self) -> Option<DeviceKind> {
        match &self.lock().slot {
            Slot::Connected(link) => Some(link.kind),
            _ => None,
        }
    }

    /// Register the notify callback, replacing the previous one.
    pub fn notify(&self, callback: impl Fn(Notification) + Send + Sync + 'static) {
        self.lock().callback = Some(Arc::new(callback));
    }

    /// A copy of the calibration table collected so far
    pub fn calibration_table(&self) -> Calibration {
        self.lock().calibration.clone()
    }

    pub fn reset_calibration(&self) {
        self.lock().calibration.reset();
    }
}

/// Take the link out of the slot if it is still the one of `generation`.
fn release(shared: &Mutex<Shared>, generation: Option<u64>) -> Option<Link> {
    let mut shared = lock(shared);
    match &shared.slot {
        Slot::Connected(link) if generation.map_or(true, |g| g == link.generation) => {}
        _ => return None,
    }
    let Slot::Connected(link) = std::mem::replace(&mut shared.slot, Slot::Idle) else {
        return None;
    };
    if !shared.retain_calibration {
        shared.calibration.reset();
    }
    Some(link)
}

fn deliver(callback: Option<NotifyCallback>, source: &str, values: Vec<NotificationValue>) {
    let Some(callback) = callback else {
        return;
    };
    for value in values {
        callback(Notification {
            source: source.to_string(),
            value,
        });
    }
}

/// Decode the frames of one characteristic in delivery order.
async fn pump(
    state: Weak<Mutex<Shared>>,
    generation: u64,
    source: String,
    mut frames: FrameStream,
) {
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%source, "notification error: {err:#}");
                continue;
            }
        };
        trace!(%source, "RX: {}", hex::encode(&frame));

        let Some(shared) = state.upgrade() else {
            break;
        };
        let decoded = {
            let mut guard = lock(&shared);
            let Shared {
                slot,
                calibration,
                callback,
                ..
            } = &mut *guard;
            match slot {
                Slot::Connected(link) if link.generation == generation => Some((
                    link.decoder.decode(&frame, calibration, Instant::now()),
                    callback.clone(),
                )),
                _ => None,
            }
        };
        let Some((values, callback)) = decoded else {
            break;
        };
        deliver(callback, &source, values);
    }
    debug!(%source, "notification stream ended");
}

/// Decode advertisements until the device goes quiet for longer than `liveness`.
async fn watch_advertisements(
    state: Weak<Mutex<Shared>>,
    generation: u64,
    liveness: Duration,
    mut advertisements: AdvertisementStream,
) {
    loop {
        let advertisement = match timeout(liveness, advertisements.next()).await {
            Err(_) => {
                warn!("{}", Error::LivenessTimeout(liveness));
                break;
            }
            Ok(None) => {
                debug!("advertisement stream ended");
                break;
            }
            Ok(Some(advertisement)) => advertisement,
        };

        let Some(shared) = state.upgrade() else {
            return;
        };
        let decoded = {
            let mut guard = lock(&shared);
            let Shared { slot, callback, .. } = &mut *guard;
            match slot {
                Slot::Connected(link) if link.generation == generation => Some((
                    link.decoder.decode_advertisement(&advertisement, Instant::now()),
                    callback.clone(),
                )),
                _ => None,
            }
        };
        let Some((value, callback)) = decoded else {
            return;
        };
        deliver(callback, ADVERTISEMENT_SOURCE, value.into_iter().collect());
    }

    if let Some(shared) = state.upgrade() {
        if let Some(link) = release(&shared, Some(generation)) {
            info!(device = %link.kind, "device gone");
        }
    }
}

async fn observe_disconnect(
    state: Weak<Mutex<Shared>>,
    generation: u64,
    disconnected: BoxFuture<'static, ()>,
) {
    disconnected.await;
    if let Some(shared) = state.upgrade() {
        if let Some(link) = release(&shared, Some(generation)) {
            info!(device = %link.kind, "device disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBearer, MockPeripheral};

    fn session(peripheral: MockPeripheral) -> (Session<Arc<MockBearer>>, Arc<MockPeripheral>) {
        let peripheral = Arc::new(peripheral);
        let bearer = Arc::new(MockBearer::new().with_peripheral(peripheral.clone()));
        let config = SessionConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        (Session::with_config(bearer, config), peripheral)
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_session_idle() {
        let (session, _) = session(MockPeripheral::from_kind(DeviceKind::Entralpi).not_connectable());
        let err = session.connect(DeviceKind::Entralpi).await.unwrap_err();
        assert!(matches!(err, Error::BearerUnavailable { ref device } if device == "ENTRALPI"));
        assert!(!session.is_connected());

        let err = session.connect(DeviceKind::Progressor).await.unwrap_err();
        assert_eq!(err.to_string(), "no device selected matching [name=Progressor]");
    }

    #[tokio::test]
    async fn test_binds_declared_characteristics() {
        let (session, peripheral) = session(MockPeripheral::from_kind(DeviceKind::Motherboard));
        session.connect(DeviceKind::Motherboard).await.unwrap();
        assert_eq!(session.device(), Some(DeviceKind::Motherboard));

        let bound = session
            .with_link(|link, _| {
                link.bound
                    .iter()
                    .map(|b| format!("{}.{}", b.service, b.characteristic))
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert!(bound.contains(&"uart.rx".to_string()));
        assert!(bound.contains(&"battery.level".to_string()));
        assert_eq!(bound.len(), 8);

        let rx = peripheral
            .characteristic(crate::device::MOTHERBOARD.services[3].characteristics[1].uuid)
            .unwrap();
        assert!(rx.is_subscribed());
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let (session, peripheral) = session(MockPeripheral::from_kind(DeviceKind::Entralpi));
        session.disconnect().await.unwrap();
        session.connect(DeviceKind::Entralpi).await.unwrap();
        session.disconnect().await.unwrap();
        assert!(!session.is_connected());
        assert!(!peripheral.is_connected().await);
        session.disconnect().await.unwrap();
    }
}
