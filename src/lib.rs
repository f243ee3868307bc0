//! Read force measurements from climbing hangboards and training scales over Bluetooth Low Energy
//!
//! Supported devices:
//!
//! - Griptonite Motherboard: three calibrated load cells (left, centre, right)
//! - Entralpi: a single load cell
//! - Tindeq Progressor
//! - Weiheng WH-C06 crane scale, which only broadcasts its reading in advertisements
//! - PitchSix Force Board and MAT Muscle Meter, whose notifications are passed through undecoded
//!
//! A [`Session`] owns one connection at a time. Decoded values are handed to the callback
//! registered with [`Session::notify`].
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! # use gripread::{BluestBearer, DeviceKind, Session};
//! #
//! # #[tokio::main]
//! # pub async fn main() -> gripread::Result<()> {
//!     let session = Session::new(BluestBearer::new().await?);
//!     session.notify(|notification| {
//!         if let Some(measurement) = notification.measurement() {
//!             println!("{measurement}");
//!         }
//!     });
//!     session.connect(DeviceKind::Motherboard).await?;
//!     session.calibration().await?;
//!     session.stream(Some(Duration::from_secs(10))).await?;
//!     session.disconnect().await?;
//! #   Ok(())
//! # }
//! ```

pub mod bearer;
#[cfg(feature = "bluest")]
pub mod bluest_bearer;
pub mod calibration;
mod command;
pub mod config;
pub mod device;
mod error;
pub mod measurement;
pub mod mock;
pub mod protocol;
mod session;
pub mod tare;

#[cfg(feature = "bluest")]
pub use bluest_bearer::BluestBearer;
pub use calibration::{Calibration, CalibrationPoint};
pub use config::SessionConfig;
pub use device::DeviceKind;
pub use error::{Error, Result};
pub use measurement::{Measurement, Notification, NotificationValue, ReadValue};
pub use session::{NotifyCallback, Session, ADVERTISEMENT_SOURCE};
