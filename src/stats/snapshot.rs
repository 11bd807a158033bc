use std::{collections::BTreeMap, time::Duration};

use serde::{Serialize, Serializer, ser::SerializeMap};

/// Point-in-time view of every timer and counter of a run.
///
/// Durations serialize as fractional milliseconds.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Timers by name.
    pub timers: BTreeMap<String, TimerSnapshot>,
    /// Wall time from the start of `before` to the end of `after`.
    #[serde(serialize_with = "millis")]
    pub total_elapsed: Duration,
    /// Response status codes seen by all exchanges.
    pub status: BTreeMap<u16, u64>,
    /// Exchanges that got no response at all.
    pub transport_errors: u64,
    /// Response body bytes read.
    pub bytes: u64,
}

impl StatsSnapshot {
    /// Number of values recorded by the timer `name`.
    pub fn count(&self, name: &str) -> u64 {
        self.timers.get(name).map_or(0, |t| t.meter.count)
    }

    /// Snapshot of the timer `name`.
    pub fn timer(&self, name: &str) -> Option<&TimerSnapshot> {
        self.timers.get(name)
    }
}

/// Snapshot of one timer.
#[derive(Clone, Debug, Serialize)]
pub struct TimerSnapshot {
    /// Rate of recorded values.
    pub meter: MeterSnapshot,
    /// Latency distribution, absent while nothing was recorded.
    #[serde(rename = "histogram", skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySnapshot>,
}

/// Snapshot of a meter.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSnapshot {
    /// Total number of events.
    pub count: u64,
    /// Events per second since the meter was created.
    pub mean_rate: f64,
    /// Events per second over the last few seconds.
    pub current_rate: f64,
}

/// Summary of a latency distribution.
#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    /// Lowest latency.
    #[serde(serialize_with = "millis")]
    pub min: Duration,
    /// Highest latency.
    #[serde(serialize_with = "millis")]
    pub max: Duration,
    /// Mean latency.
    #[serde(serialize_with = "millis")]
    pub mean: Duration,
    /// Median latency.
    #[serde(serialize_with = "millis")]
    pub median: Duration,
    /// Standard deviation.
    #[serde(serialize_with = "millis")]
    pub stdev: Duration,
    /// `(percentage, latency)` pairs in ascending order.
    #[serde(serialize_with = "percentiles")]
    pub percentiles: Vec<(f64, Duration)>,
}

fn as_millis(d: &Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(as_millis(d))
}

fn percentiles<S: Serializer>(v: &[(f64, Duration)], s: S) -> Result<S::Ok, S::Error> {
    let mut map = s.serialize_map(Some(v.len()))?;
    for (p, d) in v {
        map.serialize_entry(&format!("p{p}"), &as_millis(d))?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_durations_as_millis() {
        let snapshot = StatsSnapshot {
            timers: BTreeMap::from([(
                "main".to_string(),
                TimerSnapshot {
                    meter: MeterSnapshot { count: 2, mean_rate: 1.0, current_rate: 0.5 },
                    latency: Some(LatencySnapshot {
                        min: Duration::from_millis(1),
                        max: Duration::from_millis(4),
                        mean: Duration::from_micros(2500),
                        median: Duration::from_millis(2),
                        stdev: Duration::ZERO,
                        percentiles: vec![(50.0, Duration::from_millis(2)), (99.9, Duration::from_millis(4))],
                    }),
                },
            )]),
            total_elapsed: Duration::from_secs(2),
            status: BTreeMap::from([(200, 2)]),
            transport_errors: 0,
            bytes: 12,
        };

        let v = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(v["totalElapsed"], json!(2000.0));
        assert_eq!(v["timers"]["main"]["meter"]["count"], json!(2));
        assert_eq!(v["timers"]["main"]["histogram"]["mean"], json!(2.5));
        assert_eq!(v["timers"]["main"]["histogram"]["percentiles"]["p99.9"], json!(4.0));
        assert_eq!(v["status"]["200"], json!(2));
    }
}
