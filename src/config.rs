use std::time::Duration;

use serde::Deserialize;

/// Tunables of a [`Session`](crate::Session). Durations are in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to look for the device before giving up
    pub scan_timeout_ms: u64,
    /// Pause between finding a service and listing its characteristics. Some firmware
    /// answers with an empty list without it.
    pub settle_delay_ms: u64,
    /// An advertising only device counts as gone after this long without an advertisement
    pub liveness_timeout_ms: u64,
    /// Time the Motherboard needs to send its whole calibration table
    pub calibration_delay_ms: u64,
    /// Pause after each single shot read
    pub read_delay_ms: u64,
    /// How long a software tare averages readings
    pub tare_duration_ms: u64,
    /// Keep the calibration table when disconnecting
    pub retain_calibration: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 30_000,
            settle_delay_ms: 100,
            liveness_timeout_ms: 10_000,
            calibration_delay_ms: 2_500,
            read_delay_ms: 250,
            tare_duration_ms: 5_000,
            retain_calibration: false,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn calibration_delay(&self) -> Duration {
        Duration::from_millis(self.calibration_delay_ms)
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    pub fn tare_duration(&self) -> Duration {
        Duration::from_millis(self.tare_duration_ms)
    }
}

#[test]
fn test_partial_json() {
    let config = SessionConfig::from_json(r#"{"settle_delay_ms": 0, "retain_calibration": true}"#)
        .unwrap();
    assert_eq!(config.settle_delay(), Duration::ZERO);
    assert!(config.retain_calibration);
    assert_eq!(config.liveness_timeout(), Duration::from_secs(10));
    assert_eq!(SessionConfig::from_json("{}").unwrap(), SessionConfig::default());
}
