//! Piecewise linear conversion of raw load cell readings into force.
//!
//! The Motherboard reports its factory calibration as lines of
//! `channel,index,raw,force`. The first point of a channel is the zero crossing: readings
//! below it are mirrored around it and reported as negative force.

use crate::error::{Error, Result};

/// Channels reported by a Motherboard calibration dump
pub const CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub channel: usize,
    pub index: usize,
    /// Raw ADC reading at this point
    pub raw: f64,
    /// Reference force at this point
    pub force: f64,
}

impl CalibrationPoint {
    /// Parse a `channel,index,raw,force` line. `None` if the line has another shape.
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return None;
        }
        let channel = fields[0].parse::<usize>().ok()?;
        if channel >= CHANNELS {
            return None;
        }
        Some(Self {
            channel,
            index: fields[1].parse().ok()?,
            raw: fields[2].parse().ok()?,
            force: fields[3].parse().ok()?,
        })
    }
}

/// Calibration tables of all channels.
#[derive(Debug, Default, Clone)]
pub struct Calibration {
    tables: [Vec<CalibrationPoint>; CHANNELS],
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: CalibrationPoint) -> Result<()> {
        let table = self
            .tables
            .get_mut(point.channel)
            .ok_or(Error::UnknownChannel {
                channel: point.channel,
            })?;
        table.push(point);
        Ok(())
    }

    pub fn points(&self, channel: usize) -> &[CalibrationPoint] {
        self.tables.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether each of the first `channels` channels has at least one point
    pub fn is_calibrated(&self, channels: usize) -> bool {
        self.first_uncalibrated(channels).is_none()
    }

    pub fn first_uncalibrated(&self, channels: usize) -> Option<usize> {
        (0..channels.min(CHANNELS)).find(|&c| self.tables[c].is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(Vec::is_empty)
    }

    pub fn reset(&mut self) {
        self.tables.iter_mut().for_each(Vec::clear);
    }

    /// Convert a raw reading of `channel` into force.
    pub fn convert(&self, channel: usize, raw: f64) -> Result<f64> {
        apply(raw, self.points(channel)).ok_or(Error::UncalibratedChannel { channel })
    }
}

/// Interpolate `raw` over `table`. `None` when the table is empty.
///
/// A reading past the last point is not extrapolated and yields 0.
pub fn apply(raw: f64, table: &[CalibrationPoint]) -> Option<f64> {
    let zero = table.first()?.raw;
    let (sign, sample) = if raw < zero {
        (-1.0, 2.0 * zero - raw)
    } else {
        (1.0, raw)
    };

    let force = table
        .windows(2)
        .find(|pair| sample < pair[1].raw)
        .map(|pair| {
            let (start, end) = (&pair[0], &pair[1]);
            start.force + (sample - start.raw) / (end.raw - start.raw) * (end.force - start.force)
        })
        .unwrap_or(0.0);

    Some(sign * force)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(channel: usize, index: usize, raw: f64, force: f64) -> CalibrationPoint {
        CalibrationPoint {
            channel,
            index,
            raw,
            force,
        }
    }

    fn table() -> Vec<CalibrationPoint> {
        vec![
            point(0, 0, 100.0, 0.0),
            point(0, 1, 500.0, 80.0),
            point(0, 2, 900.0, 200.0),
        ]
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(
            CalibrationPoint::parse("0,1,500,80"),
            Some(point(0, 1, 500.0, 80.0))
        );
        assert_eq!(
            CalibrationPoint::parse("2, 0, -12.5, 0"),
            Some(point(2, 0, -12.5, 0.0))
        );
        assert_eq!(CalibrationPoint::parse("0,1,500"), None);
        assert_eq!(CalibrationPoint::parse("a,1,500,80"), None);
        assert_eq!(CalibrationPoint::parse("7,1,500,80"), None);
    }

    #[test]
    fn test_interpolation() {
        let table = table();
        assert_eq!(apply(300.0, &table), Some(40.0));
        assert_eq!(apply(100.0, &table), Some(0.0));
        assert_eq!(apply(700.0, &table), Some(140.0));
    }

    #[test]
    fn test_mirroring() {
        let table = table();
        for s in [99.0, 0.0, -250.0, -299.0] {
            let mirrored = 2.0 * 100.0 - s;
            assert_eq!(apply(s, &table), apply(mirrored, &table).map(|f| -f));
        }
        assert_eq!(apply(-100.0, &table), Some(-40.0));
    }

    #[test]
    fn test_idempotent() {
        let table = table();
        let first = apply(423.0, &table);
        for _ in 0..10 {
            assert_eq!(apply(423.0, &table), first);
        }
    }

    #[test]
    fn test_beyond_table_is_zero() {
        let table = table();
        assert_eq!(apply(900.0, &table), Some(0.0));
        assert_eq!(apply(5000.0, &table), Some(0.0));
        assert_eq!(apply(250.0, &table[..1]), Some(0.0));
    }

    #[test]
    fn test_uncalibrated_channel() {
        let mut calibration = Calibration::new();
        assert!(matches!(
            calibration.convert(1, 300.0),
            Err(Error::UncalibratedChannel { channel: 1 })
        ));
        assert_eq!(calibration.first_uncalibrated(3), Some(0));

        calibration.add_point(point(0, 0, 100.0, 0.0)).unwrap();
        calibration.add_point(point(1, 0, 100.0, 0.0)).unwrap();
        assert_eq!(calibration.first_uncalibrated(3), Some(2));
        calibration.add_point(point(2, 0, 100.0, 0.0)).unwrap();
        assert!(calibration.is_calibrated(3));

        calibration.reset();
        assert!(calibration.is_empty());
    }

    #[test]
    fn test_point_for_unknown_channel() {
        let mut calibration = Calibration::new();
        assert!(matches!(
            calibration.add_point(point(CHANNELS, 0, 100.0, 0.0)),
            Err(Error::UnknownChannel { channel: 4 })
        ));
        assert!(calibration.is_empty());
        assert!(calibration.points(CHANNELS).is_empty());
    }
}
