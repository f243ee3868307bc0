//! Weiheng WH-C06 crane scale, also sold as the MAT Muscle Meter.
//!
//! The scale never accepts a connection. It broadcasts its reading in the manufacturer data
//! of its advertisements, so the session only has to listen.

use std::time::Instant;

use crate::bearer::Advertisement;
use crate::measurement::{floor, Measurement, NotificationValue};
use crate::protocol::RunningStats;
use crate::tare::Tare;

/// Company identifier of the manufacturer data carrying the reading
pub const MANUFACTURER_ID: u16 = 0x0100;
/// Offset of the weight, u16 BE in kg/100
pub const WEIGHT_OFFSET: usize = 10;

pub(crate) fn weight(advertisement: &Advertisement) -> Option<f64> {
    let data = advertisement
        .manufacturer_data
        .as_ref()
        .filter(|m| m.company_id == MANUFACTURER_ID)?;
    let bytes = data.data.get(WEIGHT_OFFSET..WEIGHT_OFFSET + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]) as f64 / 100.0)
}

#[derive(Debug, Clone)]
pub struct WhC06Decoder {
    pub(crate) tare: Tare,
    stats: RunningStats,
}

impl WhC06Decoder {
    pub fn new(tare: Tare) -> Self {
        Self {
            tare,
            stats: RunningStats::default(),
        }
    }

    pub fn decode(&mut self, advertisement: &Advertisement, now: Instant) -> Option<NotificationValue> {
        let weight = weight(advertisement)?;
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
