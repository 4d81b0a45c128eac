//! Linear time extrapolation for the descent and unwind loops.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Descent,
    Unwind,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Descent => f.write_str("descent"),
            Phase::Unwind => f.write_str("cleanup"),
        }
    }
}

/// Time figures derived from one sample. `None` means no sample yet (infinite).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub elapsed: Duration,
    pub left: Option<Duration>,
    pub total: Option<Duration>,
}

impl Estimate {
    pub fn unknown(elapsed: Duration) -> Self {
        Self {
            elapsed,
            left: None,
            total: None,
        }
    }

    /// `total = elapsed / done * (done + remaining)`, `left = elapsed / done * remaining`.
    pub fn extrapolate(elapsed: Duration, done: u64, remaining: u64) -> Self {
        if done == 0 {
            return Self::unknown(elapsed);
        }
        let per_step = elapsed.as_secs_f64() / done as f64;
        Self {
            elapsed,
            left: Some(Duration::from_secs_f64(per_step * remaining as f64)),
            total: Some(Duration::from_secs_f64(
                per_step * done.saturating_add(remaining) as f64,
            )),
        }
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn secs(d: Option<Duration>) -> String {
            match d {
                Some(d) => format!("{:.3}", d.as_secs_f64()),
                None => "inf".to_string(),
            }
        }
        write!(
            f,
            "time left/total: {}/{}s",
            secs(self.left),
            secs(self.total)
        )
    }
}

/// Samples a monotonic clock whenever the depth crosses a multiple of `interval`.
#[derive(Debug)]
pub struct Estimator {
    started: Instant,
    interval: u64,
    last: Estimate,
}

impl Estimator {
    pub fn start(interval: u64) -> Self {
        Self {
            started: Instant::now(),
            interval: interval.max(1),
            last: Estimate::unknown(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns a fresh estimate when `depth` lands on the sampling cadence.
    pub fn observe(&mut self, depth: u64, done: u64, remaining: u64) -> Option<Estimate> {
        if depth % self.interval != 0 {
            return None;
        }
        self.last = Estimate::extrapolate(self.elapsed(), done, remaining);
        Some(self.last)
    }

    pub fn last(&self) -> Estimate {
        self.last
    }
}

/// Receives progress samples. Called at most once per sampling interval.
pub trait ProgressSink {
    fn sample(&mut self, phase: Phase, depth: u64, max: u64, estimate: &Estimate);

    fn finish(&mut self, _phase: Phase, _elapsed: Duration) {}
}

/// Discards every sample.
#[derive(Debug, Default)]
pub struct Silent;

impl ProgressSink for Silent {
    fn sample(&mut self, _phase: Phase, _depth: u64, _max: u64, _estimate: &Estimate) {}
}
