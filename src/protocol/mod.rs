//! Per device decoding of notified frames and advertisements.

pub mod entralpi;
pub mod motherboard;
pub mod progressor;
pub mod wh_c06;

use std::time::{Duration, Instant};

use crate::bearer::Advertisement;
use crate::calibration::Calibration;
use crate::device::DeviceKind;
use crate::measurement::NotificationValue;
use crate::tare::Tare;

use entralpi::EntralpiDecoder;
use motherboard::MotherboardDecoder;
use progressor::ProgressorDecoder;
use wh_c06::WhC06Decoder;

/// Running maximum and mean of the readings of one session.
#[derive(Debug, Default, Clone)]
pub struct RunningStats {
    max: f64,
    sum: f64,
    count: usize,
}

impl RunningStats {
    /// Fold in a reading, returning the new (max, average)
    pub fn push(&mut self, mass: f64) -> (f64, f64) {
        self.max = self.max.max(mass);
        self.sum += mass;
        self.count += 1;
        (self.max, self.sum / self.count as f64)
    }
}

/// Decoding state of the connected device.
#[derive(Debug, Clone)]
pub enum Decoder {
    Motherboard(MotherboardDecoder),
    Entralpi(EntralpiDecoder),
    Progressor(ProgressorDecoder),
    WhC06(WhC06Decoder),
    /// Hands frames to the caller undecoded
    Passthrough,
}

impl Decoder {
    pub fn new(kind: DeviceKind, tare_duration: Duration) -> Self {
        match kind {
            DeviceKind::Motherboard => Decoder::Motherboard(MotherboardDecoder::default()),
            DeviceKind::Entralpi => Decoder::Entralpi(EntralpiDecoder::new(Tare::new(tare_duration))),
            DeviceKind::Progressor => Decoder::Progressor(ProgressorDecoder::default()),
            DeviceKind::WhC06 => Decoder::WhC06(WhC06Decoder::new(Tare::new(tare_duration))),
            DeviceKind::ForceBoard | DeviceKind::MuscleMeter => Decoder::Passthrough,
        }
    }

    /// Decode a notified frame. Returns one value per measurement or calibration update.
    pub fn decode(
        &mut self,
        frame: &[u8],
        calibration: &mut Calibration,
        now: Instant,
    ) -> Vec<NotificationValue> {
        match self {
            Decoder::Motherboard(decoder) => decoder.decode(frame, calibration),
            Decoder::Entralpi(decoder) => decoder.decode(frame, now).into_iter().collect(),
            Decoder::Progressor(decoder) => decoder.decode(frame),
            Decoder::WhC06(_) => Vec::new(),
            Decoder::Passthrough => vec![passthrough(frame)],
        }
    }

    pub fn decode_advertisement(
        &mut self,
        advertisement: &Advertisement,
        now: Instant,
    ) -> Option<NotificationValue> {
        match self {
            Decoder::WhC06(decoder) => decoder.decode(advertisement, now),
            _ => None,
        }
    }

    /// The software tare of this device, if it has one
    pub fn tare(&mut self) -> Option<&mut Tare> {
        match self {
            Decoder::Entralpi(decoder) => Some(&mut decoder.tare),
            Decoder::WhC06(decoder) => Some(&mut decoder.tare),
            _ => None,
        }
    }
}

fn passthrough(frame: &[u8]) -> NotificationValue {
    match std::str::from_utf8(frame) {
        Ok(text) => NotificationValue::Text(text.to_string()),
        Err(_) => NotificationValue::Raw(frame.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;

    #[test]
    fn test_dispatch_by_kind() {
        let tare = Duration::from_secs(5);
        assert!(matches!(Decoder::new(DeviceKind::Motherboard, tare), Decoder::Motherboard(_)));
        assert!(matches!(Decoder::new(DeviceKind::WhC06, tare), Decoder::WhC06(_)));
        assert!(matches!(Decoder::new(DeviceKind::ForceBoard, tare), Decoder::Passthrough));
    }

    #[test]
    fn test_entralpi_frame() {
        let mut decoder = Decoder::new(DeviceKind::Entralpi, Duration::from_secs(5));
        let values = decoder.decode(&[0x20, 0x03], &mut Calibration::new(), Instant::now());
        let [NotificationValue::Measurement(Measurement { mass_total, .. })] = values.as_slice()
        else {
            panic!("expected one measurement, got {values:?}");
        };
        assert_eq!(*mass_total, 8.00);
    }

    #[test]
    fn test_passthrough() {
        let mut decoder = Decoder::Passthrough;
        let mut calibration = Calibration::new();
        let now = Instant::now();
        assert_eq!(
            decoder.decode(b"hello", &mut calibration, now),
            vec![NotificationValue::Text("hello".to_string())]
        );
        assert_eq!(
            decoder.decode(&[0xff, 0x00], &mut calibration, now),
            vec![NotificationValue::Raw(vec![0xff, 0x00])]
        );
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        assert_eq!(stats.push(-2.0), (0.0, -2.0));
        assert_eq!(stats.push(4.0), (4.0, 1.0));
    }
}
