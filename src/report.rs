//! The benchmark report.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::BenchError,
    event::RunEnd,
    opts::BenchOpts,
    phase::Phase,
    stats::{MAIN_TIMER, StatsSnapshot},
};

/// Final result of a run.
///
/// Serializes to camelCase JSON; this is also the body answered by the HTTP
/// front-end.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Requested number of iterations.
    pub iterations: u64,
    /// Concurrency limit.
    pub limit: usize,
    /// Number of errors over all phases.
    pub error_count: u64,
    /// The last error, as `Failed in <phase> with err: <error>`.
    pub last_error: Option<String>,
    /// Set when there were at least as many errors as iterations.
    pub total_failure: bool,
    /// Failure of the one-time `before` phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    /// Whether the run was cancelled early.
    pub cancelled: bool,
    /// Highest number of iterations executing at once.
    pub peak_concurrency: usize,
    /// Highest number of iterations waiting for admission.
    pub peak_queued: usize,
    /// Error count per phase.
    pub errors_by_phase: BTreeMap<Phase, u64>,
    /// Final statistics.
    pub stats: StatsSnapshot,
}

impl BenchReport {
    /// Ratio of `main` phases that completed without error.
    pub fn success_ratio(&self) -> f64 {
        let total = self.stats.count(MAIN_TIMER);
        if total == 0 {
            return 0.0;
        }
        let failed = self.errors_by_phase.get(&Phase::Main).copied().unwrap_or_default();
        total.saturating_sub(failed) as f64 / total as f64
    }
}

/// Folds the event stream of a run into a [`BenchReport`].
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    started_at: DateTime<Utc>,
    iterations: u64,
    limit: usize,
    last_error: Option<String>,
    errors_by_phase: BTreeMap<Phase, u64>,
}

impl ReportBuilder {
    pub fn new(opts: &BenchOpts) -> Self {
        Self {
            started_at: Utc::now(),
            iterations: opts.iterations.get(),
            limit: opts.limit.get(),
            last_error: None,
            errors_by_phase: BTreeMap::new(),
        }
    }

    pub fn error(&mut self, phase: Phase, error: &BenchError) {
        *self.errors_by_phase.entry(phase).or_default() += 1;
        let cause = error.exchange().map_or_else(|| error.to_string(), ToString::to_string);
        self.last_error = Some(format!("Failed in {phase} with err: {cause}"));
    }

    pub fn finish(self, end: RunEnd) -> BenchReport {
        BenchReport {
            started_at: self.started_at,
            iterations: self.iterations,
            limit: self.limit,
            error_count: end.error_count,
            last_error: self.last_error,
            total_failure: end.error_count >= self.iterations,
            setup_error: end.setup_error.map(|e| e.to_string()),
            cancelled: end.cancelled,
            peak_concurrency: end.peak_concurrency,
            peak_queued: end.peak_queued,
            errors_by_phase: self.errors_by_phase,
            stats: end.snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use http::StatusCode;

    use super::*;
    use crate::{error::ExchangeError, opts::RunOptions, stats::Stats};

    fn end(stats: &Stats, error_count: u64) -> RunEnd {
        RunEnd {
            snapshot: stats.snapshot(),
            error_count,
            setup_error: None,
            peak_concurrency: 2,
            peak_queued: 4,
            cancelled: false,
        }
    }

    #[test]
    fn last_error_names_phase_and_cause() {
        let opts = RunOptions::new(2, 4).validate().unwrap();
        let mut builder = ReportBuilder::new(&opts);
        let error = BenchError::in_phase(Phase::Main, 3, ExchangeError::Status(StatusCode::NOT_FOUND));
        builder.error(Phase::Main, &error);

        let stats = Stats::new();
        for _ in 0..4 {
            stats.record(MAIN_TIMER, Duration::from_millis(1)).unwrap();
        }
        let report = builder.finish(end(&stats, 1));

        assert_eq!(report.last_error.as_deref(), Some("Failed in main with err: error statusCode: 404"));
        assert!(!report.total_failure);
        assert_eq!(report.success_ratio(), 0.75);
    }

    #[test]
    fn total_failure_when_errors_reach_iterations() {
        let opts = RunOptions::new(1, 2).validate().unwrap();
        let mut builder = ReportBuilder::new(&opts);
        for _ in 0..2 {
            builder.error(Phase::Main, &BenchError::in_phase(Phase::Main, 0, ExchangeError::Status(StatusCode::GONE)));
        }
        let report = builder.finish(end(&Stats::new(), 2));
        assert!(report.total_failure);
        assert_eq!(report.success_ratio(), 0.0);
    }

    #[test]
    fn serializes_camel_case() {
        let opts = RunOptions::new(3, 9).validate().unwrap();
        let setup = Arc::new(BenchError::Setup(ExchangeError::Status(StatusCode::BAD_GATEWAY)));
        let mut builder = ReportBuilder::new(&opts);
        builder.error(Phase::Before, &setup);
        let report = builder.finish(RunEnd { setup_error: Some(setup), ..end(&Stats::new(), 1) });

        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["errorCount"], 1);
        assert_eq!(v["totalFailure"], false);
        assert_eq!(v["lastError"], "Failed in before with err: error statusCode: 502");
        assert_eq!(v["setupError"], "setup failed: error statusCode: 502");
        assert_eq!(v["errorsByPhase"]["before"], 1);
        assert_eq!(v["peakQueued"], 4);
        assert!(v["stats"]["totalElapsed"].is_number());
    }
}
