//! Entralpi force plate. Starts streaming on connect, every notification is one reading.

use std::time::Instant;

use tracing::debug;

use crate::error::Error;
use crate::measurement::{floor, Measurement, NotificationValue};
use crate::protocol::RunningStats;
use crate::tare::Tare;

/// Weight in kg/100, u16 LE
pub(crate) fn weight(frame: &[u8]) -> Option<f64> {
    let bytes: [u8; 2] = frame.get(..2)?.try_into().ok()?;
    Some(u16::from_le_bytes(bytes) as f64 / 100.0)
}

#[derive(Debug, Clone)]
pub struct EntralpiDecoder {
    pub(crate) tare: Tare,
    stats: RunningStats,
}

impl EntralpiDecoder {
    pub fn new(tare: Tare) -> Self {
        Self {
            tare,
            stats: RunningStats::default(),
        }
    }

    pub fn decode(&mut self, frame: &[u8], now: Instant) -> Option<NotificationValue> {
        let Some(weight) = weight(frame) else {
            debug!("{}", Error::MalformedFrame(hex::encode(frame)));
            return None;
        };
        let mass = floor(self.tare.apply(weight, now));
        let (max, average) = self.stats.push(mass);
        Some(NotificationValue::Measurement(Measurement {
            mass_total: mass,
            mass_max: Some(max),
            mass_average: Some(average),
            ..Default::default()
        }))
    }
}

#[test]
fn test_weight() {
    assert_eq!(weight(&800u16.to_le_bytes()), Some(8.0));
    assert_eq!(weight(&[0x20, 0x03, 0xff]), Some(8.0));
    assert_eq!(weight(&[0x20]), None);
}

#[test]
fn test_decode_with_stats() {
    use std::time::Duration;

    let now = Instant::now();
    let mut decoder = EntralpiDecoder::new(Tare::new(Duration::from_secs(5)));
    decoder.decode(&1000u16.to_le_bytes(), now);
    let value = decoder.decode(&800u16.to_le_bytes(), now);
    assert_eq!(
        value,
        Some(NotificationValue::Measurement(Measurement {
            mass_total: 8.0,
            mass_max: Some(10.0),
            mass_average: Some(9.0),
            ..Default::default()
        }))
    );
}
