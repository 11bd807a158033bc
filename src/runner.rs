//! The run controller and the concurrency-limited scheduler.
//!
//! A run executes the one-time `before` phase, then every iteration
//! (`beforeMain`, `main`, `afterMain`), then the one-time `after` phase.
//! Iteration tasks are produced into a bounded queue of `prealloc` slots and
//! admitted by a semaphore of `limit` permits, so memory stays bounded no
//! matter how many iterations are requested.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Instant,
};

use tokio::{
    select,
    sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch},
    task::{JoinHandle, JoinSet},
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::{
    context::{EtagCache, IterationEnv, RunShared, http_client},
    error::{BenchError, ExchangeError, Result},
    event::{BenchEvent, Progress, RunEnd},
    flow::Flow,
    opts::{BenchOpts, RunOptions},
    phase::{Phase, SchedulerState, run_phase},
    stats::{MAIN_TIMER, Stats},
    template::{CompiledFlow, Compiler},
};

/// A benchmark ready to run: options validated and flow compiled.
pub struct Benchmark {
    opts: BenchOpts,
    flow: CompiledFlow,
    shared: Arc<RunShared>,
}

/// Handle of a started benchmark.
pub struct BenchHandle {
    /// Events of the run; [`BenchEvent::End`] is the last one.
    pub events: mpsc::UnboundedReceiver<BenchEvent>,
    /// Cancels the run: no more iterations are admitted, in-flight ones
    /// finish, then `after` runs as usual.
    pub cancel: CancellationToken,
    /// Current scheduler state.
    pub state: watch::Receiver<SchedulerState>,
    /// The controller task.
    pub join: JoinHandle<()>,
}

impl Benchmark {
    /// Validates `options` and compiles `flow`. No request is sent.
    pub fn new(flow: &Flow, options: &RunOptions) -> Result<Self> {
        let opts = options.validate()?;
        let flow = Compiler::new(&opts.inputs).flow(flow)?;
        let client = http_client(opts.limit.get())
            .map_err(|e| BenchError::config(format!("cannot build http client: {e}")))?;

        let shared = Arc::new(RunShared {
            client,
            credentials: opts.credentials.clone(),
            timeout: opts.timeout,
            etags: EtagCache::default(),
            stats: Arc::new(Stats::new()),
        });
        Ok(Self { opts, flow, shared })
    }

    /// Validated options of the run.
    pub fn opts(&self) -> &BenchOpts {
        &self.opts
    }

    /// Statistics of the run, updated live.
    pub fn stats(&self) -> Arc<Stats> {
        self.shared.stats.clone()
    }

    /// Spawns the run on the current tokio runtime.
    pub fn start(self) -> BenchHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let cancel = CancellationToken::new();
        let controller = Controller {
            ctx: Arc::new(RunCtx {
                flow: self.flow,
                shared: self.shared,
                events: tx,
                errors: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                peak_concurrency: AtomicUsize::new(0),
                peak_queued: AtomicUsize::new(0),
            }),
            opts: self.opts,
            state: Arc::new(state_tx),
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(controller.run());
        BenchHandle { events, cancel, state, join }
    }
}

/// State shared by the controller and every iteration task.
struct RunCtx {
    flow: CompiledFlow,
    shared: Arc<RunShared>,
    events: mpsc::UnboundedSender<BenchEvent>,
    errors: AtomicU64,
    active: AtomicUsize,
    peak_concurrency: AtomicUsize,
    peak_queued: AtomicUsize,
}

impl RunCtx {
    fn env(&self, index: u64, phase: Phase) -> IterationEnv {
        IterationEnv::new(self.shared.clone(), index, phase)
    }

    fn stats(&self) -> &Stats {
        &self.shared.stats
    }

    fn report(&self, phase: Phase, index: u64, source: ExchangeError) -> Arc<BenchError> {
        let error = Arc::new(BenchError::in_phase(phase, index, source));
        self.errors.fetch_add(1, Ordering::Relaxed);
        log::error!("{error}");
        // safe to ignore the error which means the receiver is dropped
        let _ = self.events.send(BenchEvent::Error { error: error.clone(), phase });
        error
    }

    fn progress(&self, iterations: u64) -> Progress {
        let snapshot = self.stats().snapshot();
        let main = snapshot.timer(MAIN_TIMER).map(|t| t.meter);
        let percent = main.map_or(0, |m| (m.count as f64 * 100.0 / iterations as f64).round() as u64);
        Progress {
            percent,
            concurrency: self.active.load(Ordering::Relaxed),
            rate: main.map_or(0.0, |m| m.current_rate),
            snapshot,
        }
    }
}

/// Counts an executing iteration for as long as it is alive.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(ctx: &'a RunCtx) -> Self {
        let active = ctx.active.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.peak_concurrency.fetch_max(active, Ordering::Relaxed);
        Self(&ctx.active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An iteration waiting for admission.
struct IterationTask {
    env: IterationEnv,
}

struct Controller {
    ctx: Arc<RunCtx>,
    opts: BenchOpts,
    state: Arc<watch::Sender<SchedulerState>>,
    cancel: CancellationToken,
}

impl Controller {
    async fn run(self) {
        let started = Instant::now();
        let ctx = &self.ctx;

        let progress = self.opts.progress.map(|period| {
            let ctx = ctx.clone();
            let iterations = self.opts.iterations.get();
            tokio::spawn(async move {
                let mut ticks = interval(period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticks.tick().await;
                loop {
                    ticks.tick().await;
                    let _ = ctx.events.send(BenchEvent::Progress(ctx.progress(iterations)));
                }
            })
        });

        let mut env = ctx.env(0, Phase::Before);
        let setup_error = match run_phase(&mut env, Phase::Before, &ctx.flow.before).await {
            Ok(()) => None,
            Err(e) => Some(ctx.report(Phase::Before, 0, e)),
        };

        let mut cancelled = false;
        if setup_error.is_some() {
            self.transition(SchedulerState::Complete);
        } else {
            cancelled = self.schedule().await;

            let mut env = ctx.env(0, Phase::After);
            if let Err(e) = run_phase(&mut env, Phase::After, &ctx.flow.after).await {
                ctx.report(Phase::After, 0, e);
            }
        }

        if let Some(progress) = progress {
            progress.abort();
        }
        ctx.stats().finish(started.elapsed());
        let end = RunEnd {
            snapshot: ctx.stats().snapshot(),
            error_count: ctx.errors.load(Ordering::Relaxed),
            setup_error,
            peak_concurrency: ctx.peak_concurrency.load(Ordering::Relaxed),
            peak_queued: ctx.peak_queued.load(Ordering::Relaxed),
            cancelled,
        };
        log::debug!("run finished with {} errors in {:?}", end.error_count, end.snapshot.total_elapsed);
        let _ = ctx.events.send(BenchEvent::End(end));
    }

    fn transition(&self, state: SchedulerState) {
        log::debug!("scheduler state: {state}");
        self.state.send_replace(state);
    }

    /// Runs every iteration; returns `true` if the run was cancelled early.
    async fn schedule(&self) -> bool {
        let (tx, mut rx) = mpsc::channel(self.opts.prealloc.get());
        let limit = Arc::new(Semaphore::new(self.opts.limit.get()));

        self.transition(SchedulerState::Filling);
        let producer = {
            let ctx = self.ctx.clone();
            let state = self.state.clone();
            let cancel = self.cancel.clone();
            let iterations = self.opts.iterations.get();
            tokio::spawn(async move {
                for index in 0..iterations {
                    let slot = select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        slot = tx.reserve() => slot,
                    };
                    let Ok(slot) = slot else { return };
                    slot.send(IterationTask { env: ctx.env(index, Phase::BeforeMain) });
                    let queued = tx.max_capacity() - tx.capacity();
                    ctx.peak_queued.fetch_max(queued, Ordering::Relaxed);
                }
                log::debug!("scheduler state: {}", SchedulerState::Draining);
                state.send_replace(SchedulerState::Draining);
            })
        };

        let mut set = JoinSet::new();
        let mut cancelled = false;
        loop {
            let permit = select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = limit.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };
            let task = select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                task = rx.recv() => task,
            };
            let Some(task) = task else { break };

            set.spawn(iteration(self.ctx.clone(), task, permit));
            while let Some(res) = set.try_join_next() {
                if let Err(e) = res {
                    log::error!("iteration task failed: {e}");
                }
            }
        }

        // stop producing and drop whatever is still queued
        rx.close();
        if let Err(e) = producer.await {
            log::error!("producer task failed: {e}");
        }
        drop(rx);

        if cancelled {
            log::warn!("run cancelled, waiting for {} in-flight iterations", set.len());
            self.transition(SchedulerState::Draining);
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                log::error!("iteration task failed: {e}");
            }
        }
        self.transition(SchedulerState::Complete);
        cancelled
    }
}

/// Runs one iteration while holding an admission permit.
async fn iteration(ctx: Arc<RunCtx>, task: IterationTask, _permit: OwnedSemaphorePermit) {
    let _active = ActiveGuard::enter(&ctx);
    let mut env = task.env;
    let index = env.index();

    if let Err(e) = run_phase(&mut env, Phase::BeforeMain, &ctx.flow.before_main).await {
        ctx.report(Phase::BeforeMain, index, e);
        return;
    }

    let started = Instant::now();
    let main = run_phase(&mut env, Phase::Main, &ctx.flow.main).await;
    if let Err(e) = ctx.stats().record(MAIN_TIMER, started.elapsed()) {
        log::warn!("cannot record main latency of iteration {index}: {e}");
    }
    if let Err(e) = main {
        ctx.report(Phase::Main, index, e);
    }

    if let Err(e) = run_phase(&mut env, Phase::AfterMain, &ctx.flow.after_main).await {
        ctx.report(Phase::AfterMain, index, e);
    }
}
