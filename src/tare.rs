use std::time::{Duration, Instant};

use tracing::debug;

/// Software tare for devices that cannot zero themselves.
///
/// After [`Tare::start`] every reading is collected for `duration`, then their mean becomes
/// the new baseline. Until then the previous baseline stays in effect.
#[derive(Debug, Clone)]
pub struct Tare {
    duration: Duration,
    baseline: f64,
    sampling: Option<Sampling>,
}

#[derive(Debug, Clone)]
struct Sampling {
    started: Instant,
    sum: f64,
    count: usize,
}

impl Tare {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            baseline: 0.0,
            sampling: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.sampling = Some(Sampling {
            started: now,
            sum: 0.0,
            count: 0,
        });
    }

    /// Use a known baseline, cancelling any tare in progress
    pub fn set(&mut self, baseline: f64) {
        self.sampling = None;
        self.baseline = baseline;
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    /// Correct `value` by the current baseline, feeding a tare in progress.
    pub fn apply(&mut self, value: f64, now: Instant) -> f64 {
        if let Some(sampling) = &mut self.sampling {
            sampling.sum += value;
            sampling.count += 1;
            if now.duration_since(sampling.started) >= self.duration {
                self.baseline = sampling.sum / sampling.count as f64;
                self.sampling = None;
                debug!(baseline = self.baseline, "tare complete");
            }
        }
        value - self.baseline
    }
}

#[test]
fn test_tare_window() {
    let t0 = Instant::now();
    let mut tare = Tare::new(Duration::from_secs(5));
    assert_eq!(tare.apply(2.0, t0), 2.0);

    tare.start(t0);
    assert_eq!(tare.apply(2.0, t0 + Duration::from_secs(1)), 2.0);
    assert!(tare.is_sampling());
    assert_eq!(tare.apply(4.0, t0 + Duration::from_secs(5)), 1.0);
    assert!(!tare.is_sampling());
    assert_eq!(tare.baseline(), 3.0);
    assert_eq!(tare.apply(10.0, t0 + Duration::from_secs(6)), 7.0);

    tare.set(0.5);
    assert_eq!(tare.apply(10.0, t0 + Duration::from_secs(7)), 9.5);
}
