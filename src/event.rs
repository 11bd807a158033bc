//! Notifications emitted by a running benchmark.
use std::sync::Arc;

use crate::{error::BenchError, phase::Phase, stats::StatsSnapshot};

/// An event of a running benchmark.
#[derive(Clone, Debug)]
pub enum BenchEvent {
    /// Periodic progress, sent when a progress interval is configured.
    Progress(Progress),

    /// A failure in one of the phases.
    Error {
        /// The failure.
        error: Arc<BenchError>,
        /// Phase the failing operation belongs to.
        phase: Phase,
    },

    /// The run finished; always the last event.
    End(RunEnd),
}

/// Progress of a running benchmark.
#[derive(Clone, Debug)]
pub struct Progress {
    /// Statistics so far.
    pub snapshot: StatsSnapshot,
    /// Completed `main` phases in percent of the iterations, rounded.
    pub percent: u64,
    /// Iterations executing right now.
    pub concurrency: usize,
    /// Current rate of completed `main` phases per second.
    pub rate: f64,
}

/// Final state of a run.
#[derive(Clone, Debug)]
pub struct RunEnd {
    /// Final statistics.
    pub snapshot: StatsSnapshot,
    /// Number of errors over all phases.
    pub error_count: u64,
    /// Failure of the one-time `before` phase; no iteration ran.
    pub setup_error: Option<Arc<BenchError>>,
    /// Highest number of iterations executing at once.
    pub peak_concurrency: usize,
    /// Highest number of iterations waiting for admission.
    pub peak_queued: usize,
    /// Whether the run was cancelled before every iteration was admitted.
    pub cancelled: bool,
}
