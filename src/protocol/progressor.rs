//! Tindeq Progressor.
//!
//! Commands are single bytes written to the `tx` characteristic. Every notification starts
//! with a response code, followed by a length byte and the payload.

use tracing::{debug, warn};

use crate::error::Error;
use crate::measurement::{floor, Measurement, NotificationValue, ReadValue};
use crate::protocol::RunningStats;

pub const TARE_SCALE: u8 = 0x64;
pub const START_WEIGHT_MEAS: u8 = 0x65;
pub const STOP_WEIGHT_MEAS: u8 = 0x66;
pub const START_PEAK_RFD_MEAS: u8 = 0x67;
pub const START_PEAK_RFD_MEAS_SERIES: u8 = 0x68;
pub const ADD_CALIBRATION_POINT: u8 = 0x69;
pub const SAVE_CALIBRATION: u8 = 0x6a;
pub const GET_APP_VERSION: u8 = 0x6b;
pub const GET_ERROR_INFORMATION: u8 = 0x6c;
pub const CLR_ERROR_INFORMATION: u8 = 0x6d;
pub const SLEEP: u8 = 0x6e;
pub const GET_BATTERY_VOLTAGE: u8 = 0x6f;

pub const RES_CMD_RESPONSE: u8 = 0;
pub const RES_WEIGHT_MEAS: u8 = 1;
pub const RES_RFD_PEAK: u8 = 2;
pub const RES_RFD_PEAK_SERIES: u8 = 3;
pub const RES_LOW_PWR_WARNING: u8 = 4;

/// A weight sample: f32 LE kg followed by a u32 LE timestamp in µs
const SAMPLE_LEN: usize = 8;

#[derive(Debug, Default, Clone)]
pub struct ProgressorDecoder {
    /// The last command written, which decides how a command response is read
    pending: Option<u8>,
    stats: RunningStats,
}

impl ProgressorDecoder {
    /// Remember `command` so its response can be decoded
    pub fn expect_response(&mut self, command: u8) {
        self.pending = Some(command);
    }

    pub fn decode(&mut self, frame: &[u8]) -> Vec<NotificationValue> {
        let Some((&code, rest)) = frame.split_first() else {
            return Vec::new();
        };
        let payload = rest.get(1..).unwrap_or(&[]);

        match code {
            RES_WEIGHT_MEAS => payload
                .chunks_exact(SAMPLE_LEN)
                .map(|sample| {
                    let weight = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                    let mass = floor(f64::from(weight));
                    let (max, average) = self.stats.push(mass);
                    NotificationValue::Measurement(Measurement {
                        mass_total: mass,
                        mass_max: Some(max),
                        mass_average: Some(average),
                        ..Default::default()
                    })
                })
                .collect(),
            RES_CMD_RESPONSE => vec![NotificationValue::Response(self.response(payload))],
            RES_RFD_PEAK | RES_RFD_PEAK_SERIES => vec![NotificationValue::Raw(payload.to_vec())],
            RES_LOW_PWR_WARNING => {
                warn!("Progressor battery low");
                Vec::new()
            }
            _ => {
                debug!("{}", Error::MalformedFrame(hex::encode(frame)));
                Vec::new()
            }
        }
    }

    fn response(&mut self, payload: &[u8]) -> ReadValue {
        match self.pending.take() {
            Some(GET_BATTERY_VOLTAGE) if payload.len() >= 4 => ReadValue::Millivolts(
                u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            ),
            Some(GET_APP_VERSION) => {
                ReadValue::Text(String::from_utf8_lossy(payload).trim_end_matches('\0').to_string())
            }
            _ => ReadValue::Raw(payload.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_samples() {
        let mut frame = vec![RES_WEIGHT_MEAS, 16];
        for (weight, micros) in [(12.5f32, 1000u32), (20.0, 1100)] {
            frame.extend_from_slice(&weight.to_le_bytes());
            frame.extend_from_slice(&micros.to_le_bytes());
        }
        let mut decoder = ProgressorDecoder::default();
        let values = decoder.decode(&frame);
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[1],
            NotificationValue::Measurement(Measurement {
                mass_total: 20.0,
                mass_max: Some(20.0),
                mass_average: Some(16.25),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_command_responses() {
        let mut decoder = ProgressorDecoder::default();

        decoder.expect_response(GET_BATTERY_VOLTAGE);
        let mut frame = vec![RES_CMD_RESPONSE, 4];
        frame.extend_from_slice(&3712u32.to_le_bytes());
        assert_eq!(
            decoder.decode(&frame),
            vec![NotificationValue::Response(ReadValue::Millivolts(3712))]
        );

        decoder.expect_response(GET_APP_VERSION);
        assert_eq!(
            decoder.decode(b"\x00\x051.2.3"),
            vec![NotificationValue::Response(ReadValue::Text("1.2.3".to_string()))]
        );

        assert_eq!(
            decoder.decode(&[RES_CMD_RESPONSE, 1, 7]),
            vec![NotificationValue::Response(ReadValue::Raw(vec![7]))]
        );
    }

    #[test]
    fn test_ignored_frames() {
        let mut decoder = ProgressorDecoder::default();
        assert!(decoder.decode(&[]).is_empty());
        assert!(decoder.decode(&[RES_LOW_PWR_WARNING, 0]).is_empty());
        assert!(decoder.decode(&[0x42, 0]).is_empty());
    }
}
