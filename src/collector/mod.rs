//! Collectors turn the event stream of a running benchmark into a report.
mod logging;
mod silent;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

pub use logging::LogCollector;
pub use silent::SilentCollector;

use crate::{event::BenchEvent, report::BenchReport, report::ReportBuilder};

/// A trait for collecting benchmark events.
#[async_trait]
pub trait ReportCollector: Send + Sync {
    /// Consume events until the run ends and build the report.
    async fn run(&mut self) -> anyhow::Result<BenchReport>;
}

/// Event source shared by the collectors.
struct EventStream {
    builder: Option<ReportBuilder>,
    events: UnboundedReceiver<BenchEvent>,
    cancel: CancellationToken,
    ctrl_c: bool,
}

impl EventStream {
    /// Folds events into the report, passing each one to `observe` first.
    async fn collect(&mut self, mut observe: impl FnMut(&BenchEvent) + Send) -> anyhow::Result<BenchReport> {
        let Some(mut builder) = self.builder.take() else {
            anyhow::bail!("collector already ran");
        };
        loop {
            tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c(), if self.ctrl_c && !self.cancel.is_cancelled() => self.cancel.cancel(),
                event = self.events.recv() => {
                    let Some(event) = event else {
                        anyhow::bail!("benchmark stopped without a final report");
                    };
                    observe(&event);
                    match event {
                        BenchEvent::Progress(_) => {}
                        BenchEvent::Error { error, phase } => builder.error(phase, &error),
                        BenchEvent::End(end) => return Ok(builder.finish(end)),
                    }
                }
            }
        }
    }
}
