//! Silent (headless) report collector.
//!
//! [`SilentCollector`] aggregates the events of a run without printing
//! anything. It backs [`run`](crate::run) and the HTTP front-end, and the CLI
//! uses it with `--quiet`.
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::EventStream;
use crate::{event::BenchEvent, opts::BenchOpts, report::BenchReport, report::ReportBuilder};

/// A report collector that aggregates events without any output.
pub struct SilentCollector {
    stream: EventStream,
}

impl SilentCollector {
    /// Create a collector over the events of a run started with `opts`.
    pub fn new(opts: &BenchOpts, events: UnboundedReceiver<BenchEvent>, cancel: CancellationToken) -> Self {
        let builder = Some(ReportBuilder::new(opts));
        Self { stream: EventStream { builder, events, cancel, ctrl_c: false } }
    }

    /// Cancel the run on `Ctrl+C`.
    pub fn cancel_on_ctrl_c(mut self) -> Self {
        self.stream.ctrl_c = true;
        self
    }
}

#[async_trait]
impl super::ReportCollector for SilentCollector {
    async fn run(&mut self) -> anyhow::Result<BenchReport> {
        self.stream.collect(|_| {}).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::{collector::ReportCollector, event::RunEnd, opts::RunOptions, stats::Stats};

    #[tokio::test]
    async fn closed_stream_without_end_is_an_error() {
        let opts = RunOptions::new(1, 1).validate().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        let mut collector = SilentCollector::new(&opts, rx, CancellationToken::new());
        let err = collector.run().await.unwrap_err();
        assert!(err.to_string().contains("without a final report"));
    }

    #[tokio::test]
    async fn end_event_builds_the_report() {
        let opts = RunOptions::new(2, 3).validate().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let end = RunEnd {
            snapshot: Stats::new().snapshot(),
            error_count: 0,
            setup_error: None,
            peak_concurrency: 2,
            peak_queued: 1,
            cancelled: false,
        };
        tx.send(BenchEvent::End(end)).unwrap();

        let mut collector = SilentCollector::new(&opts, rx, CancellationToken::new());
        let report = collector.run().await.unwrap();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.limit, 2);
        assert_eq!(report.peak_concurrency, 2);
        assert!(collector.run().await.is_err());
    }
}
