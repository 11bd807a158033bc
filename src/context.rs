//! Run-scoped and iteration-scoped state shared by the exchanges of a benchmark.
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use http::HeaderValue;
use parking_lot::RwLock;
use reqwest::{Client, cookie::Jar, redirect};
use serde_json::Value;

use crate::{phase::Phase, stats::Stats};

/// Basic authentication credentials applied to every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password, sent empty when absent.
    pub password: Option<String>,
}

/// Entity tags cached by URI for the whole run.
///
/// Every iteration reads and writes the same cache; concurrent writers to the
/// same URI resolve as last-write-wins.
#[derive(Clone, Debug, Default)]
pub struct EtagCache(Arc<RwLock<HashMap<String, HeaderValue>>>);

impl EtagCache {
    /// Returns the cached tag for `uri`.
    pub fn get(&self, uri: &str) -> Option<HeaderValue> {
        self.0.read().get(uri).cloned()
    }

    /// Caches `tag` for `uri`, replacing any previous value.
    pub fn insert(&self, uri: impl Into<String>, tag: HeaderValue) {
        self.0.write().insert(uri.into(), tag);
    }

    /// Number of cached tags.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-iteration scratch space for hooks.
#[derive(Debug, Default)]
pub struct IterCtx {
    step_timers: HashMap<usize, Instant>,
    values: HashMap<String, Value>,
}

impl IterCtx {
    /// Returns a value stored by an earlier hook of the same iteration.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores a value for later hooks of the same iteration.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub(crate) fn start_step(&mut self, step: usize) {
        self.step_timers.insert(step, Instant::now());
    }

    pub(crate) fn end_step(&mut self, step: usize) -> Option<Duration> {
        self.step_timers.remove(&step).map(|t| t.elapsed())
    }
}

/// Builds the client shared by a run.
///
/// Redirects are not followed: a 3xx is answered to the flow so that the
/// iteration's cookie jar sees every hop.
pub(crate) fn http_client(pool_size: usize) -> reqwest::Result<Client> {
    Client::builder().pool_max_idle_per_host(pool_size).redirect(redirect::Policy::none()).build()
}

/// State owned by the run and shared by every iteration.
#[derive(Debug)]
pub(crate) struct RunShared {
    pub client: Client,
    pub credentials: Option<Credentials>,
    pub timeout: Option<Duration>,
    pub etags: EtagCache,
    pub stats: Arc<Stats>,
}

/// The context of one iteration.
///
/// A fresh context (and so a fresh cookie jar) is created for every
/// iteration; the entity tag cache and statistics are shared by the run.
pub struct IterationEnv {
    pub(crate) index: u64,
    pub(crate) phase: Phase,
    jar: Jar,
    iter_ctx: IterCtx,
    shared: Arc<RunShared>,
}

impl IterationEnv {
    pub(crate) fn new(shared: Arc<RunShared>, index: u64, phase: Phase) -> Self {
        Self { index, phase, jar: Jar::default(), iter_ctx: IterCtx::default(), shared }
    }

    /// Zero-based iteration number. One-time phases use `0`.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Phase currently being executed.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Entity tag cache of the run.
    pub fn etags(&self) -> &EtagCache {
        &self.shared.etags
    }

    /// Statistics of the run.
    pub fn stats(&self) -> &Stats {
        &self.shared.stats
    }

    /// Per-iteration hook storage.
    pub fn iter_ctx(&self) -> &IterCtx {
        &self.iter_ctx
    }

    /// Mutable per-iteration hook storage.
    pub fn iter_ctx_mut(&mut self) -> &mut IterCtx {
        &mut self.iter_ctx
    }

    pub(crate) fn jar(&self) -> &Jar {
        &self.jar
    }

    pub(crate) fn client(&self) -> &Client {
        &self.shared.client
    }

    pub(crate) fn credentials(&self) -> Option<&Credentials> {
        self.shared.credentials.as_ref()
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.shared.timeout
    }
}

impl std::fmt::Debug for IterationEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationEnv")
            .field("index", &self.index)
            .field("phase", &self.phase)
            .field("iter_ctx", &self.iter_ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_shared() -> Arc<RunShared> {
        Arc::new(RunShared {
            client: http_client(1).unwrap(),
            credentials: None,
            timeout: Some(Duration::from_secs(10)),
            etags: EtagCache::default(),
            stats: Arc::new(Stats::new()),
        })
    }

    pub(crate) fn test_env(index: u64) -> IterationEnv {
        IterationEnv::new(test_shared(), index, Phase::Main)
    }

    #[test]
    fn etag_cache_is_shared_between_clones() {
        let cache = EtagCache::default();
        let other = cache.clone();
        cache.insert("http://x/a", HeaderValue::from_static("\"v1\""));
        other.insert("http://x/a", HeaderValue::from_static("\"v2\""));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("http://x/a").unwrap(), "\"v2\"");
        assert!(cache.get("http://x/b").is_none());
    }

    #[test]
    fn iterations_share_etags_but_not_scratch_space() {
        let shared = test_shared();
        let mut a = IterationEnv::new(shared.clone(), 0, Phase::Main);
        let b = IterationEnv::new(shared, 1, Phase::Main);

        a.etags().insert("http://x/a", HeaderValue::from_static("\"v1\""));
        a.iter_ctx_mut().insert("id", Value::from(42));

        assert!(b.etags().get("http://x/a").is_some());
        assert!(b.iter_ctx().get("id").is_none());
        assert_eq!(a.iter_ctx().get("id"), Some(&Value::from(42)));
    }

    #[test]
    fn step_timer_is_consumed_once() {
        let mut ctx = IterCtx::default();
        assert!(ctx.end_step(0).is_none());
        ctx.start_step(0);
        assert!(ctx.end_step(0).is_some());
        assert!(ctx.end_step(0).is_none());
    }
}
