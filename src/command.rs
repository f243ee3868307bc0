//! Commands and single shot reads on a connected [`Session`].
//!
//! Each device family has its own command vocabulary. Operations a family has no command for
//! either do nothing (streaming devices that start on their own) or fail with
//! [`Error::Unsupported`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::time::sleep;
use tracing::debug;

use crate::bearer::{Bearer, GattCharacteristic};
use crate::device::{ids, DeviceKind};
use crate::error::{Error, Result};
use crate::measurement::ReadValue;
use crate::protocol::{motherboard, progressor, Decoder};
use crate::session::Session;

/// How the value of a characteristic is read
fn decode_read(service: &str, characteristic: &str, value: Vec<u8>) -> ReadValue {
    match (service, characteristic) {
        (ids::BATTERY, ids::LEVEL) => match value.first() {
            Some(&percent) => ReadValue::Percent(percent),
            None => ReadValue::Raw(value),
        },
        (ids::DEVICE, _) => ReadValue::Text(
            String::from_utf8_lossy(&value)
                .trim_end_matches('\0')
                .to_string(),
        ),
        _ => ReadValue::Raw(value),
    }
}

impl<B: Bearer> Session<B> {
    /// Write `value` to a characteristic bound during connect, then wait `delay`.
    pub async fn write(
        &self,
        service: &str,
        characteristic: &str,
        value: &[u8],
        delay: Duration,
    ) -> Result<()> {
        let handle = self.bound(service, characteristic)?;
        debug!(service, characteristic, "TX: {}", hex::encode(value));
        handle
            .write(value)
            .await
            .with_context(|| format!("writing {service}.{characteristic}"))?;
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(())
    }

    /// Read a characteristic bound during connect, then wait `delay`.
    pub async fn read(
        &self,
        service: &str,
        characteristic: &str,
        delay: Duration,
    ) -> Result<ReadValue> {
        let handle = self.bound(service, characteristic)?;
        let value = handle
            .read()
            .await
            .with_context(|| format!("reading {service}.{characteristic}"))?;
        debug!(service, characteristic, "read: {}", hex::encode(&value));
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(decode_read(service, characteristic, value))
    }

    fn bound(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<Arc<dyn GattCharacteristic>> {
        self.with_link(|link, _| link.characteristic(service, characteristic))?
            .ok_or_else(|| Error::CharacteristicUnresolved {
                service: service.to_string(),
                characteristic: characteristic.to_string(),
            })
    }

    fn connected_kind(&self) -> Result<DeviceKind> {
        self.device().ok_or(Error::NotConnected)
    }

    /// Write a single byte Progressor command whose answer the decoder has to recognize.
    async fn progressor_request(&self, command: u8) -> Result<()> {
        self.with_link(|link, _| {
            if let Decoder::Progressor(decoder) = &mut link.decoder {
                decoder.expect_response(command);
            }
        })?;
        self.write(ids::PROGRESSOR, ids::TX, &[command], self.config().read_delay())
            .await
    }

    /// Start streaming measurements. With a `duration` the stream is stopped once it elapses.
    ///
    /// A Motherboard needs a calibration table for all of its channels first, see
    /// [`Session::calibration`].
    pub async fn stream(&self, duration: Option<Duration>) -> Result<()> {
        let kind = self.connected_kind()?;
        match kind {
            DeviceKind::Motherboard => {
                let uncalibrated = self
                    .lock()
                    .calibration
                    .first_uncalibrated(motherboard::NUM_SAMPLES);
                if let Some(channel) = uncalibrated {
                    return Err(Error::UncalibratedChannel { channel });
                }
                self.write(ids::UART, ids::TX, motherboard::START_WEIGHT_MEAS, Duration::ZERO)
                    .await?;
            }
            DeviceKind::Progressor => {
                self.write(ids::PROGRESSOR, ids::TX, &[progressor::START_WEIGHT_MEAS], Duration::ZERO)
                    .await?;
            }
            _ => {
                debug!(device = %kind, "device streams without a command");
                return Ok(());
            }
        }

        if let Some(duration) = duration {
            sleep(duration).await;
            self.stop().await?;
        }
        Ok(())
    }

    /// Stop streaming measurements
    pub async fn stop(&self) -> Result<()> {
        match self.connected_kind()? {
            DeviceKind::Motherboard => {
                self.write(ids::UART, ids::TX, motherboard::STOP_WEIGHT_MEAS, Duration::ZERO)
                    .await
            }
            DeviceKind::Progressor => {
                self.write(ids::PROGRESSOR, ids::TX, &[progressor::STOP_WEIGHT_MEAS], Duration::ZERO)
                    .await
            }
            kind => {
                debug!(device = %kind, "device has no stop command");
                Ok(())
            }
        }
    }

    /// Ask a Motherboard for its calibration table. The points arrive as notifications and
    /// are added to the session's table. Does nothing if the table is already complete.
    pub async fn calibration(&self) -> Result<()> {
        let kind = self.connected_kind()?;
        if kind != DeviceKind::Motherboard {
            debug!(device = %kind, "device needs no calibration table");
            return Ok(());
        }
        let complete = self.lock().calibration.is_calibrated(motherboard::NUM_SAMPLES);
        if complete {
            debug!("calibration table already complete");
            return Ok(());
        }
        self.write(
            ids::UART,
            ids::TX,
            motherboard::GET_CALIBRATION,
            self.config().calibration_delay(),
        )
        .await
    }

    /// Zero the scale.
    ///
    /// The Progressor tares itself. Entralpi and WH-C06 readings are averaged for the
    /// configured tare duration and the mean is subtracted from everything after.
    pub async fn tare(&self) -> Result<()> {
        let kind = self.connected_kind()?;
        if kind == DeviceKind::Progressor {
            return self
                .write(ids::PROGRESSOR, ids::TX, &[progressor::TARE_SCALE], Duration::ZERO)
                .await;
        }

        let started = self.with_link(|link, _| match link.decoder.tare() {
            Some(tare) => {
                tare.start(Instant::now());
                true
            }
            None => false,
        })?;
        if !started {
            return Err(Error::Unsupported {
                operation: "tare",
                device: kind.label(),
            });
        }
        debug!(device = %kind, "software tare started");
        Ok(())
    }

    /// Subtract a known `baseline` from every later reading, cancelling a tare in progress.
    ///
    /// Only devices with a software tare accept a baseline.
    pub fn set_tare(&self, baseline: f64) -> Result<()> {
        let kind = self.connected_kind()?;
        let set = self.with_link(|link, _| match link.decoder.tare() {
            Some(tare) => {
                tare.set(baseline);
                true
            }
            None => false,
        })?;
        if !set {
            return Err(Error::Unsupported {
                operation: "set_tare",
                device: kind.label(),
            });
        }
        debug!(device = %kind, baseline, "tare baseline set");
        Ok(())
    }

    /// Battery level.
    ///
    /// The Progressor answers through the notify callback with
    /// [`ReadValue::Millivolts`], so `None` is returned for it.
    pub async fn battery(&self) -> Result<Option<ReadValue>> {
        if self.connected_kind()? == DeviceKind::Progressor {
            self.progressor_request(progressor::GET_BATTERY_VOLTAGE).await?;
            return Ok(None);
        }
        self.read(ids::BATTERY, ids::LEVEL, self.config().read_delay())
            .await
            .map(Some)
    }

    /// Firmware revision.
    ///
    /// The Progressor answers through the notify callback with its app version, so `None`
    /// is returned for it.
    pub async fn firmware(&self) -> Result<Option<ReadValue>> {
        if self.connected_kind()? == DeviceKind::Progressor {
            self.progressor_request(progressor::GET_APP_VERSION).await?;
            return Ok(None);
        }
        self.read(ids::DEVICE, ids::FIRMWARE, self.config().read_delay())
            .await
            .map(Some)
    }

    pub async fn hardware(&self) -> Result<ReadValue> {
        self.read(ids::DEVICE, ids::HARDWARE, self.config().read_delay())
            .await
    }

    pub async fn manufacturer(&self) -> Result<ReadValue> {
        self.read(ids::DEVICE, ids::MANUFACTURER, self.config().read_delay())
            .await
    }

    pub async fn serial(&self) -> Result<ReadValue> {
        self.read(ids::DEVICE, ids::SERIAL, self.config().read_delay())
            .await
    }
}

#[test]
fn test_decode_read() {
    assert_eq!(
        decode_read(ids::BATTERY, ids::LEVEL, vec![87]),
        ReadValue::Percent(87)
    );
    assert_eq!(
        decode_read(ids::DEVICE, ids::FIRMWARE, b"1.2.3\0".to_vec()),
        ReadValue::Text("1.2.3".to_string())
    );
    assert_eq!(
        decode_read(ids::UART, ids::RX, vec![1, 2]),
        ReadValue::Raw(vec![1, 2])
    );
}
