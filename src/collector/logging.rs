//! Report collector that logs progress and errors as they happen.
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::EventStream;
use crate::{
    event::BenchEvent,
    opts::BenchOpts,
    report::{BenchReport, ReportBuilder},
};

/// A report collector emitting a `tracing` event for every progress tick and
/// every error. Cancels the run on `Ctrl+C`.
pub struct LogCollector {
    stream: EventStream,
}

impl LogCollector {
    /// Create a collector over the events of a run started with `opts`.
    pub fn new(opts: &BenchOpts, events: UnboundedReceiver<BenchEvent>, cancel: CancellationToken) -> Self {
        let builder = Some(ReportBuilder::new(opts));
        Self { stream: EventStream { builder, events, cancel, ctrl_c: true } }
    }
}

#[async_trait]
impl super::ReportCollector for LogCollector {
    async fn run(&mut self) -> anyhow::Result<BenchReport> {
        self.stream.collect(log_event).await
    }
}

fn log_event(event: &BenchEvent) {
    match event {
        BenchEvent::Progress(p) => tracing::info!(
            percent = p.percent,
            concurrency = p.concurrency,
            rate = %format!("{:.2}", p.rate),
            elapsed = ?p.snapshot.total_elapsed,
            "progress"
        ),
        BenchEvent::Error { error, phase } => tracing::warn!(%phase, "{error}"),
        BenchEvent::End(end) if end.cancelled => tracing::warn!(errors = end.error_count, "benchmark cancelled"),
        BenchEvent::End(end) => tracing::info!(errors = end.error_count, "benchmark finished"),
    }
}
