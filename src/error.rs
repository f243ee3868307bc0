use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a [`Session`](crate::Session).
#[derive(Error, Debug)]
pub enum Error {
    #[error("no device selected matching {filters}")]
    NoDeviceSelected { filters: String },

    #[error("a device is already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("{device} does not expose a connectable GATT server")]
    BearerUnavailable { device: String },

    #[error("no services found on the connected device")]
    NoServices,

    #[error("characteristic {service}.{characteristic} was not resolved during connect")]
    CharacteristicUnresolved {
        service: String,
        characteristic: String,
    },

    #[error("calibration channel {channel} has no calibration points")]
    UncalibratedChannel { channel: usize },

    #[error("calibration channel {channel} does not exist")]
    UnknownChannel { channel: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("no advertisement received for {0:?}")]
    LivenessTimeout(Duration),

    #[error("{operation} is not supported by {device}")]
    Unsupported {
        operation: &'static str,
        device: &'static str,
    },

    #[error(transparent)]
    Bearer(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        let err = Error::CharacteristicUnresolved {
            service: "uart".to_string(),
            characteristic: "tx".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "characteristic uart.tx was not resolved during connect"
        );

        let err = Error::UncalibratedChannel { channel: 2 };
        assert_eq!(
            err.to_string(),
            "calibration channel 2 has no calibration points"
        );

        let err = Error::LivenessTimeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "no advertisement received for 10s");
    }

    #[test]
    fn test_bearer_error_keeps_context() {
        let res: anyhow::Result<()> =
            Err(anyhow::anyhow!("gatt busy")).context("discovering service uart");
        let err: Error = res.unwrap_err().into();
        assert_eq!(err.to_string(), "discovering service uart");
        assert!(format!("{err:#}").contains("gatt busy"));
    }
}
