//! Human-readable units for the text report.
use std::time::Duration;

use byte_unit::{Byte, UnitType};

/// Unit a group of latencies is printed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Micros,
    Millis,
    Secs,
}

impl TimeUnit {
    /// Picks the largest unit in which `d` is at least one.
    pub fn of(d: Duration) -> Self {
        match d.as_nanos() {
            n if n < 1_000_000 => Self::Micros,
            n if n < 1_000_000_000 => Self::Millis,
            _ => Self::Secs,
        }
    }

    pub fn format(self, d: Duration) -> String {
        let (nanos, suffix) = match self {
            Self::Micros => (1e3, "µs"),
            Self::Millis => (1e6, "ms"),
            Self::Secs => (1e9, "s"),
        };
        format!("{:.2}{suffix}", d.as_nanos() as f64 / nanos)
    }
}

pub(crate) fn bytes(n: u64) -> String {
    format!("{:.2}", Byte::from_u64(n).get_appropriate_unit(UnitType::Binary))
}

pub(crate) fn byte_rate(per_sec: f64) -> String {
    match Byte::from_f64(per_sec) {
        Some(b) => format!("{:.2}/s", b.get_appropriate_unit(UnitType::Binary)),
        None => "-".to_string(),
    }
}
