//! Statistics collected while a benchmark runs.
//!
//! The collector keeps one [`Timer`] per name (`main`, `step_<n>`) plus a few
//! run-wide counters, all behind a single lock so that a [`StatsSnapshot`] is a
//! consistent view at one instant.
//!
//! # Key Types
//!
//! - [`Stats`] - The shared, thread-safe collector.
//! - [`StatsSnapshot`] - Immutable view of every timer, serializable to JSON.
//! - [`RateWindow`] - Sliding window used for current rates.

mod snapshot;
mod window;

pub use snapshot::{LatencySnapshot, MeterSnapshot, StatsSnapshot, TimerSnapshot};
pub use window::RateWindow;

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use http::StatusCode;
use nonzero_ext::nonzero;
use parking_lot::Mutex;

use crate::{error::StatsError, histogram::LatencyHistogram};

/// Timer measuring whole `main` phases.
pub const MAIN_TIMER: &str = "main";

/// Seconds covered by the current-rate window.
const RATE_WINDOW_SECS: std::num::NonZeroUsize = nonzero!(5usize);

/// Counts events and derives mean and current rates.
#[derive(Clone, Debug)]
pub struct Meter {
    count: u64,
    started: Instant,
    window: RateWindow,
}

impl Meter {
    fn new(now: Instant) -> Self {
        Self { count: 0, started: now, window: RateWindow::new(RATE_WINDOW_SECS, now) }
    }

    fn mark(&mut self, now: Instant) {
        self.count += 1;
        self.window.mark(1, now);
    }

    fn snapshot(&mut self, now: Instant) -> MeterSnapshot {
        let age = now.saturating_duration_since(self.started).as_secs_f64();
        let mean_rate = if age > 0.0 { self.count as f64 / age } else { 0.0 };
        MeterSnapshot { count: self.count, mean_rate, current_rate: self.window.rate(now) }
    }
}

/// A latency histogram paired with a meter counting the recorded values.
#[derive(Clone, Debug)]
pub struct Timer {
    hist: LatencyHistogram,
    meter: Meter,
}

impl Timer {
    fn new(now: Instant) -> Self {
        Self { hist: LatencyHistogram::new(), meter: Meter::new(now) }
    }

    fn record(&mut self, d: Duration, now: Instant) -> Result<(), StatsError> {
        self.meter.mark(now);
        self.hist.record(d)
    }

    fn snapshot(&mut self, now: Instant) -> TimerSnapshot {
        TimerSnapshot { meter: self.meter.snapshot(now), latency: self.hist.snapshot() }
    }
}

#[derive(Debug, Default)]
struct Inner {
    timers: BTreeMap<String, Timer>,
    status: BTreeMap<u16, u64>,
    transport_errors: u64,
    bytes: u64,
    total_elapsed: Option<Duration>,
}

/// Thread-safe statistics of one run.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    inner: Mutex<Inner>,
}

impl Stats {
    /// Creates an empty collector; rates are measured from now.
    pub fn new() -> Self {
        Self { started: Instant::now(), inner: Mutex::default() }
    }

    /// Records `d` into the timer `name`, creating it on first use.
    pub fn record(&self, name: &str, d: Duration) -> Result<(), StatsError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if let Some(timer) = inner.timers.get_mut(name) {
            return timer.record(d, now);
        }
        inner.timers.entry(name.to_string()).or_insert_with(|| Timer::new(now)).record(d, now)
    }

    /// Accounts one finished exchange: its status (or a transport failure) and
    /// the number of response bytes read.
    pub fn record_exchange(&self, status: Option<StatusCode>, bytes: u64) {
        let mut inner = self.inner.lock();
        match status {
            Some(s) => *inner.status.entry(s.as_u16()).or_default() += 1,
            None => inner.transport_errors += 1,
        }
        inner.bytes += bytes;
    }

    /// Number of values recorded by the timer `name`.
    pub fn count(&self, name: &str) -> u64 {
        self.inner.lock().timers.get(name).map_or(0, |t| t.meter.count)
    }

    /// Sets the total wall time of the run.
    pub(crate) fn finish(&self, elapsed: Duration) {
        self.inner.lock().total_elapsed = Some(elapsed);
    }

    /// Takes a consistent snapshot of every timer and counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let total_elapsed = inner.total_elapsed.unwrap_or_else(|| now.saturating_duration_since(self.started));
        StatsSnapshot {
            timers: inner.timers.iter_mut().map(|(k, t)| (k.clone(), t.snapshot(now))).collect(),
            total_elapsed,
            status: inner.status.clone(),
            transport_errors: inner.transport_errors,
            bytes: inner.bytes,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn timers_are_created_on_first_record() {
        let stats = Stats::new();
        assert_eq!(stats.count(MAIN_TIMER), 0);
        stats.record(MAIN_TIMER, Duration::from_millis(3)).unwrap();
        stats.record(MAIN_TIMER, Duration::from_millis(5)).unwrap();
        stats.record("step_0", Duration::from_millis(1)).unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.timers.len(), 2);
        assert_eq!(snap.count(MAIN_TIMER), 2);
        assert_eq!(snap.count("step_0"), 1);
        assert_eq!(snap.count("step_1"), 0);
    }

    #[test]
    fn exchanges_feed_status_and_bytes() {
        let stats = Stats::new();
        stats.record_exchange(Some(StatusCode::OK), 10);
        stats.record_exchange(Some(StatusCode::OK), 5);
        stats.record_exchange(Some(StatusCode::NOT_FOUND), 0);
        stats.record_exchange(None, 0);

        let snap = stats.snapshot();
        assert_eq!(snap.status, BTreeMap::from([(200, 2), (404, 1)]));
        assert_eq!(snap.transport_errors, 1);
        assert_eq!(snap.bytes, 15);
    }

    #[test]
    fn finish_freezes_total_elapsed() {
        let stats = Stats::new();
        stats.finish(Duration::from_secs(7));
        assert_eq!(stats.snapshot().total_elapsed, Duration::from_secs(7));
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let stats = Arc::new(Stats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        stats.record(MAIN_TIMER, Duration::from_micros(i)).unwrap();
                    }
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());
        assert_eq!(stats.count(MAIN_TIMER), 8000);
    }
}
