//! Run options, as supplied by callers and as used by the runner.
use std::{
    collections::HashMap,
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    context::Credentials,
    error::{BenchError, Result},
    flow::Flow,
};

/// Upper bound of the default queue size.
pub const DEFAULT_PREALLOC: u64 = 100_000;

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options of a run as written by callers (camelCase JSON).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Maximum number of iterations running at once.
    pub limit: Option<u64>,
    /// Total number of iterations.
    pub iterations: Option<u64>,
    /// Number of iteration tasks queued ahead of admission.
    pub prealloc: Option<u64>,
    /// Interval of progress events, in milliseconds.
    pub progress: Option<u64>,
    /// Basic authentication user.
    pub user: Option<String>,
    /// Basic authentication password.
    pub password: Option<String>,
    /// Named arrays for `#{INDEX.<name>}` substitution.
    pub dynamic_input_arrays: HashMap<String, Vec<Value>>,
    /// Request timeout in milliseconds; `0` disables it.
    pub timeout: Option<u64>,
}

impl RunOptions {
    /// Options running `iterations` iterations, at most `limit` at once.
    pub fn new(limit: u64, iterations: u64) -> Self {
        Self { limit: Some(limit), iterations: Some(iterations), ..Default::default() }
    }

    /// Validates the options and fills in defaults.
    pub fn validate(&self) -> Result<BenchOpts> {
        let limit = self
            .limit
            .and_then(|n| usize::try_from(n).ok())
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| BenchError::config("runOptions.limit must be a positive integer"))?;
        let iterations = self
            .iterations
            .and_then(NonZeroU64::new)
            .ok_or_else(|| BenchError::config("runOptions.iterations must be a positive integer"))?;

        let prealloc = self.prealloc.unwrap_or(DEFAULT_PREALLOC).min(iterations.get());
        let prealloc = usize::try_from(prealloc)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| BenchError::config("runOptions.prealloc must be a positive integer"))?;

        let credentials = match (&self.user, &self.password) {
            (Some(user), password) => Some(Credentials { user: user.clone(), password: password.clone() }),
            (None, Some(_)) => return Err(BenchError::config("runOptions.password requires runOptions.user")),
            (None, None) => None,
        };

        let timeout = match self.timeout {
            None => Some(DEFAULT_TIMEOUT),
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        };

        Ok(BenchOpts {
            limit,
            iterations,
            prealloc,
            progress: self.progress.filter(|&ms| ms > 0).map(Duration::from_millis),
            credentials,
            inputs: self.dynamic_input_arrays.clone(),
            timeout,
        })
    }
}

/// Validated options of a run.
#[derive(Clone, Debug)]
pub struct BenchOpts {
    /// Maximum number of iterations running at once.
    pub limit: NonZeroUsize,

    /// Total number of iterations.
    pub iterations: NonZeroU64,

    /// Capacity of the iteration queue.
    pub prealloc: NonZeroUsize,

    /// Interval of progress events, if any.
    pub progress: Option<Duration>,

    /// Credentials for basic authentication.
    pub credentials: Option<Credentials>,

    /// Named input arrays.
    pub inputs: HashMap<String, Vec<Value>>,

    /// Request timeout; `None` waits forever.
    pub timeout: Option<Duration>,
}

/// A complete benchmark request: options plus flow.
///
/// A document without a `flow` key is taken as a bare flow with default
/// options.
#[derive(Clone, Debug)]
pub struct BenchRequest {
    /// Run options.
    pub run_options: RunOptions,
    /// The flow to run.
    pub flow: Flow,
}

impl BenchRequest {
    /// Parses a benchmark request document.
    pub fn from_json(doc: Value) -> Result<Self> {
        let mut obj = match doc {
            Value::Object(obj) if obj.contains_key("flow") => obj,
            doc => return Ok(Self { run_options: RunOptions::default(), flow: Flow::from_json(doc)? }),
        };
        let run_options = match obj.remove("runOptions") {
            Some(v) => serde_json::from_value(v).map_err(|e| BenchError::config(format!("invalid runOptions: {e}")))?,
            None => RunOptions::default(),
        };
        let flow = Flow::from_json(obj.remove("flow").unwrap_or_default())?;
        Ok(Self { run_options, flow })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let opts = RunOptions::new(10, 1000).validate().unwrap();
        assert_eq!(opts.limit.get(), 10);
        assert_eq!(opts.iterations.get(), 1000);
        assert_eq!(opts.prealloc.get(), 1000);
        assert_eq!(opts.timeout, Some(DEFAULT_TIMEOUT));
        assert!(opts.progress.is_none());
        assert!(opts.credentials.is_none());
    }

    #[test]
    fn prealloc_is_capped_by_iterations() {
        let opts = RunOptions::new(1, 500_000).validate().unwrap();
        assert_eq!(opts.prealloc.get(), DEFAULT_PREALLOC as usize);

        let mut options = RunOptions::new(1, 10);
        options.prealloc = Some(50);
        assert_eq!(options.validate().unwrap().prealloc.get(), 10);
        options.prealloc = Some(3);
        assert_eq!(options.validate().unwrap().prealloc.get(), 3);
    }

    #[test]
    fn invalid_options() {
        let cases = [
            RunOptions::default(),
            RunOptions::new(0, 10),
            RunOptions::new(10, 0),
            RunOptions { prealloc: Some(0), ..RunOptions::new(1, 1) },
            RunOptions { password: Some("p".into()), ..RunOptions::new(1, 1) },
        ];
        for options in cases {
            let err = options.validate().unwrap_err();
            assert!(matches!(err, BenchError::Configuration(_)), "{options:?}");
        }
    }

    #[test]
    fn camel_case_json() {
        let options: RunOptions = serde_json::from_value(json!({
            "limit": 5,
            "iterations": 20,
            "progress": 250,
            "user": "joe",
            "timeout": 0,
            "dynamicInputArrays": { "ids": [1, 2] },
        }))
        .unwrap();
        let opts = options.validate().unwrap();
        assert_eq!(opts.progress, Some(Duration::from_millis(250)));
        assert_eq!(opts.credentials.unwrap().user, "joe");
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.inputs["ids"], [json!(1), json!(2)]);
    }

    #[test]
    fn bench_request_with_and_without_options() {
        let req = BenchRequest::from_json(json!({
            "runOptions": { "limit": 2, "iterations": 4 },
            "flow": { "main": [{ "get": "http://x/" }] },
        }))
        .unwrap();
        assert_eq!(req.run_options.limit, Some(2));
        assert_eq!(req.flow.main.len(), 1);

        let req = BenchRequest::from_json(json!([{ "get": "http://x/" }])).unwrap();
        assert_eq!(req.run_options, RunOptions::default());
        assert_eq!(req.flow.main.len(), 1);

        assert!(BenchRequest::from_json(json!({ "runOptions": {}, "flow": null })).is_err());
    }
}
