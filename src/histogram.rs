//! A thin wrapper around [`hdrhistogram::Histogram`] for latency measurements.
use std::time::Duration;

use hdrhistogram::Histogram;

use crate::{error::StatsError, stats::LatencySnapshot};

pub(crate) const PERCENTAGES: &[f64] = &[50.0, 75.0, 90.0, 95.0, 99.0, 99.9, 99.99];

/// Latency histogram with nanosecond resolution and three significant digits.
#[derive(Clone, Debug)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Creates an empty histogram.
    pub fn new() -> LatencyHistogram {
        // auto-resizing histograms with 3 significant digits are always valid
        Self { hist: Histogram::<u64>::new(3).expect("create histogram") }
    }

    /// Records a latency value.
    pub fn record(&mut self, d: Duration) -> Result<(), StatsError> {
        let nanos = u64::try_from(d.as_nanos()).map_err(|_| StatsError::LatencyTooLarge { latency: d })?;
        self.hist.record(nanos).map_err(StatsError::HistogramRecord)
    }

    /// Number of recorded values.
    pub fn len(&self) -> u64 {
        self.hist.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    /// Highest recorded latency.
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.hist.max())
    }

    /// Lowest recorded latency.
    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.hist.min())
    }

    /// Latency at quantile `q` (`0.0..=1.0`).
    pub fn value_at_quantile(&self, q: f64) -> Duration {
        Duration::from_nanos(self.hist.value_at_quantile(q))
    }

    /// Summarizes the distribution, or `None` when it is empty.
    pub(crate) fn snapshot(&self) -> Option<LatencySnapshot> {
        if self.is_empty() {
            return None;
        }
        Some(LatencySnapshot {
            min: self.min(),
            max: self.max(),
            mean: Duration::from_nanos(self.hist.mean() as u64),
            median: self.value_at_quantile(0.5),
            stdev: Duration::from_nanos(self.hist.stdev() as u64),
            percentiles: PERCENTAGES.iter().map(|&p| (p, self.value_at_quantile(p / 100.0))).collect(),
        })
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
