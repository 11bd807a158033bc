//! A programmable HTTP load-generation engine driven by declarative REST flows.
//!
//! A benchmark runs a [`Flow`] of HTTP operations: a one-time `before` phase,
//! then `iterations` iterations of `beforeMain`, `main` and `afterMain`, at most
//! `limit` of them at once, then a one-time `after` phase. Request fields may
//! carry `#{INDEX}`, `#{GUID}` and `#{INDEX.<name>}` tokens resolved per
//! iteration, and [hooks](Hook) run around every exchange.
//!
//! ## Features
//!
//! - **Declarative**: flows are plain JSON, with shortcuts for simple cases.
//! - **Bounded**: a fixed-size queue plus a concurrency gate keep memory flat
//!   for any number of iterations.
//! - **Programmable**: built-in hooks for entity tags, status checks and step
//!   timers, plus [custom hooks](CustomHook) written in Rust.
//! - **Rich statistics**: per-timer latency histograms, rates, status codes
//!   and bytes, as text tables or JSON.
//!
//! ## Example
//!
//! ```no_run
//! use restbench::{Flow, Hook, Operation, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let flow = Flow::new(vec![
//!         Operation::put("http://localhost:8000/foo_#{INDEX}").json(serde_json::json!({ "id": "#{GUID}" })),
//!         Operation::get("http://localhost:8000/foo_#{INDEX}").after_hook(Hook::Verify2xx),
//!     ]);
//!     let report = restbench::run(&flow, &RunOptions::new(10, 1000)).await?;
//!     println!("{} errors, last: {:?}", report.error_count, report.last_error);
//!     Ok(())
//! }
//! ```
//!
//! For live progress, start a [`Benchmark`] and consume its [`BenchEvent`]s.
#![warn(missing_docs)]

mod context;
mod error;
mod event;
mod exchange;
mod flow;
mod fmt;
mod histogram;
mod hooks;
mod opts;
mod phase;
mod report;
mod runner;
mod template;

pub mod cli;
pub mod collector;
pub mod reporter;
#[cfg(feature = "server")]
pub mod server;
pub mod stats;

#[cfg(test)]
mod testing;

pub use crate::{
    context::{Credentials, EtagCache, IterCtx, IterationEnv},
    error::{BenchError, ExchangeError, Result, StatsError},
    event::{BenchEvent, Progress, RunEnd},
    exchange::{Exchange, Request, RequestBody, Response},
    flow::{Flow, Operation, Payload},
    hooks::{CustomHook, Hook},
    opts::{BenchOpts, BenchRequest, DEFAULT_PREALLOC, DEFAULT_TIMEOUT, RunOptions},
    phase::{Phase, SchedulerState},
    report::BenchReport,
    runner::{BenchHandle, Benchmark},
    template::{CompiledFlow, CompiledOperation, Compiler, Field, Template},
};

use crate::collector::{ReportCollector, SilentCollector};

/// Runs `flow` to completion and returns its report.
///
/// Fails only on invalid options or flow; failures while running are folded
/// into the report.
pub async fn run(flow: &Flow, options: &RunOptions) -> anyhow::Result<BenchReport> {
    let bench = Benchmark::new(flow, options)?;
    let opts = bench.opts().clone();
    let handle = bench.start();
    let report = SilentCollector::new(&opts, handle.events, handle.cancel).run().await?;
    handle.join.await?;
    Ok(report)
}
