//! Connect to a device, print its measurements as JSON lines for a while, then disconnect.
//!
//! ```text
//! cargo run --example stream -- Motherboard [config.json]
//! ```

use std::time::Duration;

use anyhow::{anyhow, Context};
use gripread::{BluestBearer, DeviceKind, NotificationValue, Session, SessionConfig};
use tracing_subscriber::EnvFilter;

const STREAM_DURATION: Duration = Duration::from_secs(20);

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "Motherboard".to_string());
    let kind = DeviceKind::from_name(&name).ok_or(anyhow!("Unknown device {name}"))?;
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            SessionConfig::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => SessionConfig::default(),
    };

    let session = Session::with_config(BluestBearer::new().await?, config);
    session.notify(|notification| match &notification.value {
        NotificationValue::Measurement(measurement) => match serde_json::to_string(measurement) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("{err}"),
        },
        other => println!("{}: {other:?}", notification.source),
    });

    session.connect(kind).await?;

    if let Ok(Some(battery)) = session.battery().await {
        println!("battery: {battery}");
    }
    for (label, value) in [
        ("manufacturer", session.manufacturer().await),
        ("hardware", session.hardware().await),
    ] {
        if let Ok(value) = value {
            println!("{label}: {value}");
        }
    }

    session.calibration().await?;
    session.stream(Some(STREAM_DURATION)).await?;
    session.disconnect().await?;

    Ok(())
}
