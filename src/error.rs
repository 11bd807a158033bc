//! Error types for the benchmark engine.
use http::StatusCode;
use thiserror::Error;

use crate::phase::Phase;

/// Result type used throughout the engine.
pub type Result<T, E = BenchError> = std::result::Result<T, E>;

/// Errors raised by a benchmark run.
///
/// Only [`BenchError::Configuration`] and [`BenchError::Setup`] stop a run. All
/// other variants are counted, notified and folded into the final report.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Malformed run options or flow, raised before any request is sent.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The one-time `before` phase failed; no iteration was started.
    #[error("setup failed: {0}")]
    Setup(#[source] ExchangeError),

    /// `beforeMain`, `main` or `afterMain` of a single iteration failed.
    #[error("iteration {index} failed in {phase}: {source}")]
    Iteration {
        /// Phase the failing operation belongs to.
        phase: Phase,
        /// Iteration index.
        index: u64,
        /// Underlying exchange failure.
        #[source]
        source: ExchangeError,
    },

    /// The one-time `after` phase failed.
    #[error("teardown failed: {0}")]
    Teardown(#[source] ExchangeError),
}

impl BenchError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wraps an exchange failure into the error kind matching `phase`.
    pub(crate) fn in_phase(phase: Phase, index: u64, source: ExchangeError) -> Self {
        match phase {
            Phase::Before => Self::Setup(source),
            Phase::After => Self::Teardown(source),
            phase => Self::Iteration { phase, index, source },
        }
    }

    /// Returns `true` if this error stops the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Setup(_))
    }

    /// The exchange failure behind this error, if any.
    pub fn exchange(&self) -> Option<&ExchangeError> {
        match self {
            Self::Configuration(_) => None,
            Self::Setup(e) | Self::Teardown(e) | Self::Iteration { source: e, .. } => Some(e),
        }
    }
}

/// Failure of a single HTTP exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The request could not be sent or its response could not be read.
    #[error("request to {uri} failed: {source}")]
    Transport {
        /// Target URI.
        uri: String,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },

    /// The response status was 400 or above after the hooks ran.
    #[error("error statusCode: {}", .0.as_u16())]
    Status(StatusCode),

    /// A built-in or custom hook failed.
    #[error("hook `{hook}` failed: {source}")]
    Hook {
        /// Name of the hook.
        hook: String,
        /// Hook error.
        #[source]
        source: anyhow::Error,
    },

    /// A deferred field could not be rendered into a valid value.
    #[error("substitution of `{field}` failed: {reason}")]
    Substitution {
        /// Operation field being resolved.
        field: &'static str,
        /// Why the rendered value was rejected.
        reason: String,
    },

    /// The resolved request is not a valid HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors from the statistics collector.
#[derive(Debug, Error)]
pub enum StatsError {
    /// A latency does not fit into the histogram's value range.
    #[error("latency {latency:?} is too large to record")]
    LatencyTooLarge {
        /// Offending latency.
        latency: std::time::Duration,
    },

    /// The histogram rejected a value.
    #[error("failed to record latency: {0}")]
    HistogramRecord(#[from] hdrhistogram::RecordError),
}
