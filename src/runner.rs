//! Load Profile Engine: drives login workers under a constant or ramped
//! concurrency profile and collects their attempts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::accounts::AccountPool;
use crate::error::{Error, Result};
use crate::login::TokenEndpoint;
use crate::results::{ResultSet, Summary};
use crate::schedule::{LoadProfile, RampSchedule};

/// Extra time granted to workers after the stop signal, on top of the
/// request timeout, before they are abandoned.
const JOIN_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// Stop Signals
// =============================================================================

/// Raising side of a stop signal. Constant mode shares one handle between
/// all workers; ramp mode gives every worker its own.
pub struct StopHandle {
    tx: broadcast::Sender<()>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
            raised: false,
        }
    }

    pub fn raise(&self) {
        self.tx.send(()).ok();
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a stop signal. Dropping the handle counts as raising it.
pub struct StopSignal {
    rx: broadcast::Receiver<()>,
    raised: bool,
}

impl StopSignal {
    /// Non-blocking check, sampled once per login cycle.
    pub fn is_raised(&mut self) -> bool {
        if !self.raised {
            self.raised = !matches!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.raised
    }

    pub async fn wait(&mut self) {
        if !self.raised {
            let _ = self.rx.recv().await;
            self.raised = true;
        }
    }
}

// =============================================================================
// Think Time
// =============================================================================

/// Random pause between two logins of the same worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    min: Duration,
    max: Duration,
}

impl ThinkTime {
    /// `None` when both bounds are zero.
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Option<Self>> {
        if min_ms > max_ms {
            return Err(Error::config(format!(
                "think time minimum ({min_ms}ms) exceeds maximum ({max_ms}ms)"
            )));
        }
        if max_ms == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
        }))
    }

    fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

// =============================================================================
// Workers
// =============================================================================

struct WorkerContext {
    endpoint: TokenEndpoint,
    accounts: AccountPool,
    results: Arc<ResultSet>,
    request_timeout: Duration,
    think_time: Option<ThinkTime>,
    run_start: Instant,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// Lifetime of one worker, relative to the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSpan {
    pub id: usize,
    pub started: Duration,
    pub stopped: Duration,
    pub attempts: usize,
}

async fn run_worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    mut stop: StopSignal,
    deadline: Option<Instant>,
) -> WorkerSpan {
    let started = ctx.run_start.elapsed();
    let active = ctx.active.fetch_add(1, Ordering::Relaxed) + 1;
    ctx.peak_active.fetch_max(active, Ordering::Relaxed);
    debug!("Worker {} started", id);

    let mut accounts = ctx.accounts.cursor(id);
    let mut attempts = 0;

    loop {
        if stop.is_raised() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let attempt = ctx
            .endpoint
            .login(accounts.next_account(), ctx.request_timeout)
            .await;
        ctx.results.append(attempt).await;
        attempts += 1;

        if let Some(think_time) = ctx.think_time {
            let mut wake = Instant::now() + think_time.sample();
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
            // A pause must not outlive the stop signal.
            tokio::select! {
                _ = sleep_until(wake) => {}
                _ = stop.wait() => break,
            }
        }
    }

    ctx.active.fetch_sub(1, Ordering::Relaxed);
    debug!("Worker {} stopped after {} attempts", id, attempts);

    WorkerSpan {
        id,
        started,
        stopped: ctx.run_start.elapsed(),
        attempts,
    }
}

/// Joins workers against one shared deadline. Workers still inside a
/// login call are detached, not aborted, and their late attempts are
/// left out of the summary. Returns the spans of the workers that
/// finished and how many were abandoned.
async fn join_with_grace(
    tasks: Vec<JoinHandle<WorkerSpan>>,
    grace: Duration,
) -> (Vec<WorkerSpan>, usize) {
    let deadline = Instant::now() + grace;
    let mut spans = Vec::with_capacity(tasks.len());
    let mut abandoned = 0;

    for task in tasks {
        match timeout_at(deadline, task).await {
            Ok(Ok(span)) => spans.push(span),
            Ok(Err(e)) => warn!("Worker task failed: {}", e),
            Err(_) => abandoned += 1,
        }
    }

    if abandoned > 0 {
        warn!(
            "{} workers still in flight after {:.1}s grace, abandoning them",
            abandoned,
            grace.as_secs_f64()
        );
    } else {
        info!("All workers completed before grace timeout");
    }
    (spans, abandoned)
}

// =============================================================================
// Load Test
// =============================================================================

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    /// Workers that had not returned when the grace period ran out.
    pub abandoned: usize,
    /// Most workers inside their login loop at the same time.
    pub peak_active: usize,
    /// Finished workers, ordered by id.
    pub workers: Vec<WorkerSpan>,
}

pub struct LoadTest {
    endpoint: TokenEndpoint,
    accounts: AccountPool,
    request_timeout: Duration,
    warmup: usize,
    think_time: Option<ThinkTime>,
    progress_interval: Duration,
}

impl LoadTest {
    pub fn new(endpoint: TokenEndpoint, accounts: AccountPool) -> Self {
        Self {
            endpoint,
            accounts,
            request_timeout: Duration::from_secs(10),
            warmup: 0,
            think_time: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn warmup(mut self, requests: usize) -> Self {
        self.warmup = requests;
        self
    }

    pub fn think_time(mut self, think_time: Option<ThinkTime>) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn progress_interval(mut self, every: Duration) -> Self {
        self.progress_interval = every;
        self
    }

    /// Runs the whole profile and summarizes it. Individual login failures
    /// are data; only configuration problems make this return an error.
    pub async fn run(&self, profile: LoadProfile) -> Result<RunReport> {
        profile.validate()?;

        self.warm_up().await;

        let start = Instant::now();
        let ctx = Arc::new(WorkerContext {
            endpoint: self.endpoint.clone(),
            accounts: self.accounts.clone(),
            results: Arc::new(ResultSet::new()?),
            request_timeout: self.request_timeout,
            think_time: self.think_time,
            run_start: start,
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        });

        let reporter_stop = StopHandle::new();
        let reporter = spawn_reporter(Arc::clone(&ctx), reporter_stop.subscribe(), self.progress_interval);

        let tasks = match profile {
            LoadProfile::Constant {
                concurrency,
                duration,
            } => drive_constant(&ctx, concurrency, duration, start).await,
            LoadProfile::Ramp(schedule) => drive_ramp(&ctx, &schedule, start).await,
        };

        let (workers, abandoned) = join_with_grace(tasks, self.request_timeout + JOIN_GRACE).await;
        let elapsed = start.elapsed();

        reporter_stop.raise();
        reporter.await.ok();

        let attempts = ctx.results.snapshot().await;
        Ok(RunReport {
            summary: Summary::compute(&attempts, elapsed),
            abandoned,
            peak_active: ctx.peak_active.load(Ordering::Relaxed),
            workers,
        })
    }

    /// Sequential logins whose outcome is discarded.
    async fn warm_up(&self) {
        if self.warmup == 0 {
            return;
        }
        info!("Warmup ({} requests)...", self.warmup);
        for i in 0..self.warmup {
            let attempt = self
                .endpoint
                .login(self.accounts.get(i), self.request_timeout)
                .await;
            debug!("Warmup request {}: {:?}", i, attempt.error);
        }
        info!("Warmup done");
    }
}

async fn drive_constant(
    ctx: &Arc<WorkerContext>,
    concurrency: usize,
    duration: Duration,
    start: Instant,
) -> Vec<JoinHandle<WorkerSpan>> {
    let stop = StopHandle::new();
    let deadline = start + duration;

    info!(
        "Starting {} workers for {:.1}s",
        concurrency,
        duration.as_secs_f64()
    );

    let tasks = (0..concurrency)
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                Arc::clone(ctx),
                stop.subscribe(),
                Some(deadline),
            ))
        })
        .collect();

    sleep_until(deadline).await;
    info!("Duration elapsed, stopping workers");
    stop.raise();

    tasks
}

async fn drive_ramp(
    ctx: &Arc<WorkerContext>,
    schedule: &RampSchedule,
    start: Instant,
) -> Vec<JoinHandle<WorkerSpan>> {
    let stops: Vec<StopHandle> = (0..schedule.users).map(|_| StopHandle::new()).collect();
    let mut tasks = Vec::with_capacity(schedule.users);

    // Stage 1: ramp up
    info!(
        "Stage 1: ramping to {} users over {:.1}s",
        schedule.users,
        schedule.ramp_up.as_secs_f64()
    );
    for (id, stop) in stops.iter().enumerate() {
        sleep_until(start + schedule.start_offset(id)).await;
        tasks.push(tokio::spawn(run_worker(
            id,
            Arc::clone(ctx),
            stop.subscribe(),
            None,
        )));
    }
    info!("Stage 1 complete: {} users started", tasks.len());

    // Stage 2: hold
    info!(
        "Stage 2: holding at {} users for {:.1}s",
        schedule.users,
        schedule.hold.as_secs_f64()
    );
    sleep(schedule.hold).await;
    let hold_end = Instant::now();

    // Stage 3: ramp down
    info!(
        "Stage 3: ramping down over {:.1}s",
        schedule.ramp_down.as_secs_f64()
    );
    for (id, stop) in stops.iter().enumerate() {
        sleep_until(hold_end + schedule.stop_offset(id)).await;
        stop.raise();
    }
    info!("Stage 3 complete: all stop signals raised");

    tasks
}

fn spawn_reporter(
    ctx: Arc<WorkerContext>,
    mut stop: StopSignal,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.wait() => break,
                _ = ticker.tick() => {
                    let progress = ctx.results.progress().await;
                    let p95 = progress
                        .approx_p95
                        .map(|d| format!("{:.3}s", d.as_secs_f64()))
                        .unwrap_or_else(|| "-".to_string());
                    info!(
                        "active={}, requests={}, failures={}, p95~{}",
                        ctx.active.load(Ordering::Relaxed),
                        progress.total,
                        progress.failures,
                        p95
                    );
                }
            }
        }
    })
}
