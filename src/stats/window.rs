//! Sliding-window rate calculation.
//!
//! Time is divided into one-second buckets. Marks accumulate into the front
//! bucket; the window rotates lazily whenever it is touched, dropping buckets
//! older than its size. The current rate is the number of marks still in the
//! window divided by the time span the window covers.

use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

const BUCKET: Duration = Duration::from_secs(1);

/// Rolling count of events over the last `size` seconds.
#[derive(Clone, Debug)]
pub struct RateWindow {
    buckets: VecDeque<u64>,
    size: NonZeroUsize,
    /// Start of the front bucket.
    front_start: Instant,
    /// When the window was created; bounds the covered span for young windows.
    created: Instant,
}

impl RateWindow {
    /// Creates a window covering `size` seconds, starting at `now`.
    pub fn new(size: NonZeroUsize, now: Instant) -> Self {
        let mut buckets = VecDeque::with_capacity(size.get());
        buckets.push_front(0);
        Self { buckets, size, front_start: now, created: now }
    }

    /// Adds `n` events at `now`.
    pub fn mark(&mut self, n: u64, now: Instant) {
        self.advance(now);
        *self.buckets.front_mut().expect("window is never empty") += n;
    }

    /// Events per second over the covered span, as seen at `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.advance(now);
        let full = (self.buckets.len() - 1) as u32 * BUCKET;
        let span = (full + now.saturating_duration_since(self.front_start))
            .min(now.saturating_duration_since(self.created));
        if span.is_zero() {
            return 0.0;
        }
        self.buckets.iter().sum::<u64>() as f64 / span.as_secs_f64()
    }

    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.front_start);
        let rotations = (elapsed.as_secs() as usize).min(self.size.get());
        for _ in 0..rotations {
            if self.buckets.len() == self.size.get() {
                self.buckets.pop_back();
            }
            self.buckets.push_front(0);
        }
        // keep bucket boundaries aligned even when the window was idle
        self.front_start += BUCKET * elapsed.as_secs() as u32;
    }
}
