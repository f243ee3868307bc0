//! Griptonite Motherboard.
//!
//! The board speaks ASCII over Nordic UART. Everything it sends is a `\n` terminated line,
//! but lines are split across notifications at arbitrary points, so the bytes are
//! collected in a [`LineBuffer`] first.
//!
//! Two kinds of line are understood:
//!
//! - Streaming packets: 32 hex characters encoding 16 bytes
//!
//!   Start Byte | End Byte | Meaning
//!   0          | 1        | Sample number, u16 LE
//!   2          | 3        | Raw battery reading, u16 LE
//!   4          | 12       | 3 samples (left, centre, right), i24 LE each
//!   13         | 15       | Unused
//!
//! - Calibration points: `channel,index,raw,force`, sent in response to
//!   [`GET_CALIBRATION`]

use std::time::SystemTime;

use tracing::{debug, trace};

use crate::calibration::{Calibration, CalibrationPoint};
use crate::error::{Error, Result};
use crate::measurement::{floor, Measurement, NotificationValue};

/// Request the serial number
pub const GET_SERIAL: &[u8] = b"#";
/// Start streaming weight measurements
pub const START_WEIGHT_MEAS: &[u8] = b"S30";
/// Any command stops the stream, so stopping is an empty write
pub const STOP_WEIGHT_MEAS: &[u8] = b"";
/// Dump the calibration table, one point per line
pub const GET_CALIBRATION: &[u8] = b"C";
pub const GET_TEXT: &[u8] = b"T";
pub const DEBUG_STREAM: &[u8] = b"D";

/// Length of a streaming packet line in hex characters
pub const PACKET_LENGTH: usize = 32;
/// Samples per streaming packet
pub const NUM_SAMPLES: usize = 3;
/// Longest line kept while waiting for its terminator
pub const MAX_LINE_LENGTH: usize = 4096;

/// Accumulates notification bytes and hands out complete lines in arrival order.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Append notified bytes. An unterminated line longer than [`MAX_LINE_LENGTH`] is
    /// discarded.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        let unterminated = match self.buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => self.buf.len() - idx - 1,
            None => self.buf.len(),
        };
        if unterminated > MAX_LINE_LENGTH {
            let start = self.buf.len() - unterminated;
            let dropped = self.buf.split_off(start);
            debug!(
                "{}",
                Error::MalformedFrame(format!("{} bytes without a line terminator", dropped.len()))
            );
        }
    }

    /// Remove the next complete line, without its `\n` and an optional trailing `\r`.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let idx = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Bytes of an incomplete line still waiting for their terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// One decoded streaming packet.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingPacket {
    pub received: SystemTime,
    pub sample_num: u16,
    pub battery_raw: u16,
    /// Raw readings of the left, centre and right load cells
    pub samples: [i32; NUM_SAMPLES],
}

impl StreamingPacket {
    /// Parse a streaming packet line. `None` unless the line is exactly 32 hex characters.
    pub fn parse(line: &str, received: SystemTime) -> Option<Self> {
        if line.len() != PACKET_LENGTH || !line.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let bytes = hex::decode(line).ok()?;

        let mut samples = [0; NUM_SAMPLES];
        for (i, sample) in samples.iter_mut().enumerate() {
            let start = 4 + 3 * i;
            *sample = i24_le(&bytes[start..start + 3]);
        }

        Some(Self {
            received,
            sample_num: u16::from_le_bytes([bytes[0], bytes[1]]),
            battery_raw: u16::from_le_bytes([bytes[2], bytes[3]]),
            samples,
        })
    }

    /// Calibrated force of each channel, in sample order
    pub fn masses(&self, calibration: &Calibration) -> Result<[f64; NUM_SAMPLES]> {
        let mut masses = [0.0; NUM_SAMPLES];
        for (channel, mass) in masses.iter_mut().enumerate() {
            *mass = calibration.convert(channel, self.samples[channel] as f64)?;
        }
        Ok(masses)
    }

    pub fn measurement(&self, calibration: &Calibration) -> Result<Measurement> {
        let [left, centre, right] = self.masses(calibration)?;
        Ok(Measurement {
            mass_total: floor(left + centre + right),
            mass_left: Some(floor(left)),
            mass_right: Some(floor(right)),
            mass_centre: Some(floor(centre)),
            ..Default::default()
        })
    }
}

/// Sign extend a 24 bit little endian integer
fn i24_le(bytes: &[u8]) -> i32 {
    let v = i32::from(bytes[0]) | i32::from(bytes[1]) << 8 | i32::from(bytes[2]) << 16;
    (v << 8) >> 8
}

#[derive(Debug, PartialEq)]
pub enum Line {
    Packet(StreamingPacket),
    Calibration(CalibrationPoint),
    Unrecognized,
}

pub fn parse_line(line: &str, received: SystemTime) -> Line {
    if let Some(packet) = StreamingPacket::parse(line, received) {
        return Line::Packet(packet);
    }
    if let Some(point) = CalibrationPoint::parse(line) {
        return Line::Calibration(point);
    }
    Line::Unrecognized
}

#[derive(Debug, Default, Clone)]
pub struct MotherboardDecoder {
    lines: LineBuffer,
}

impl MotherboardDecoder {
    pub fn decode(&mut self, frame: &[u8], calibration: &mut Calibration) -> Vec<NotificationValue> {
        self.lines.push(frame);

        let mut values = Vec::new();
        while let Some(line) = self.lines.next_line() {
            let line = String::from_utf8_lossy(&line);
            match parse_line(&line, SystemTime::now()) {
                Line::Packet(packet) => match packet.measurement(calibration) {
                    Ok(measurement) => values.push(NotificationValue::Measurement(measurement)),
                    Err(err) => debug!(sample_num = packet.sample_num, "dropping packet: {err}"),
                },
                Line::Calibration(point) => {
                    trace!(?point, "calibration point");
                    match calibration.add_point(point) {
                        Ok(()) => values.push(NotificationValue::Calibration(point)),
                        Err(err) => debug!("dropping calibration point: {err}"),
                    }
                }
                Line::Unrecognized => {
                    debug!("{}", Error::MalformedFrame(line.into_owned()));
                }
            }
        }
        values
    }
}
