use serde::ser::Serializer;
use serde::Serialize;

use crate::calibration::CalibrationPoint;

/// Readings below this are sensor noise or overflow
pub const MASS_FLOOR: f64 = -1000.0;

/// A decoded reading, in kg.
///
/// Serializes with camelCase keys and values as strings fixed to 3 decimals,
/// e.g. `{"massTotal":"12.300"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(serialize_with = "fixed")]
    pub mass_total: f64,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "fixed_opt")]
    pub mass_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "fixed_opt")]
    pub mass_right: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "fixed_opt")]
    pub mass_centre: Option<f64>,
    /// Highest reading since the session connected
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "fixed_opt")]
    pub mass_max: Option<f64>,
    /// Mean of all readings since the session connected
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "fixed_opt")]
    pub mass_average: Option<f64>,
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "total={}", to_fixed(self.mass_total))?;
        let parts = [
            ("left", self.mass_left),
            ("centre", self.mass_centre),
            ("right", self.mass_right),
            ("max", self.mass_max),
            ("average", self.mass_average),
        ];
        for (label, value) in parts {
            if let Some(value) = value {
                write!(f, " {label}={}", to_fixed(value))?;
            }
        }
        Ok(())
    }
}

/// Clamp a reading to [`MASS_FLOOR`]
pub fn floor(mass: f64) -> f64 {
    mass.max(MASS_FLOOR)
}

/// Format a mass with 3 decimals
pub fn to_fixed(mass: f64) -> String {
    format!("{mass:.3}")
}

fn fixed<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_fixed(*value))
}

fn fixed_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => fixed(value, serializer),
        None => serializer.serialize_none(),
    }
}

/// What a device told us.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationValue {
    Measurement(Measurement),
    /// A calibration point was added to the session's calibration table
    Calibration(CalibrationPoint),
    /// The answer to a command written earlier
    Response(ReadValue),
    /// Undecoded text, from devices without a dedicated decoder
    Text(String),
    /// Undecoded bytes
    Raw(Vec<u8>),
}

/// A value handed to the notify callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// UUID of the characteristic the value came from, or `advertisement`
    pub source: String,
    pub value: NotificationValue,
}

impl Notification {
    pub fn measurement(&self) -> Option<&Measurement> {
        match &self.value {
            NotificationValue::Measurement(m) => Some(m),
            _ => None,
        }
    }
}

/// A single shot characteristic read, decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadValue {
    /// Battery level in %
    Percent(u8),
    /// Battery voltage in mV
    Millivolts(u32),
    Text(String),
    Raw(Vec<u8>),
}

impl std::fmt::Display for ReadValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadValue::Percent(p) => write!(f, "{p}%"),
            ReadValue::Millivolts(mv) => write!(f, "{mv}mV"),
            ReadValue::Text(s) => f.write_str(s),
            ReadValue::Raw(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
    }
}

#[test]
fn test_serialize_fixed() {
    let m = Measurement {
        mass_total: floor(-2500.0),
        mass_left: Some(12.3),
        mass_right: None,
        mass_centre: Some(-0.0004),
        mass_max: None,
        mass_average: None,
    };
    let json = serde_json::to_string(&m).unwrap();
    assert_eq!(
        json,
        r#"{"massTotal":"-1000.000","massLeft":"12.300","massCentre":"-0.000"}"#
    );
}

#[test]
fn test_display() {
    let m = Measurement {
        mass_total: 8.0,
        mass_max: Some(9.5),
        ..Default::default()
    };
    assert_eq!(m.to_string(), "total=8.000 max=9.500");
    assert_eq!(ReadValue::Raw(vec![0xde, 0xad]).to_string(), "0xdead");
}
