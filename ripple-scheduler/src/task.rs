//! Background tasks that drive refresh cycles and watermark resets.
//!
//! Each registered trigger gets one task. The task runs its cycles one at a
//! time: a firing that comes due while a cycle is still running is dropped,
//! never queued. Cycle failures are recorded and logged, and the task keeps
//! its schedule.
//!
//! Tasks stop when the shutdown watch flips to `true` or its sender is
//! dropped. A cycle already in flight is allowed to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use ripple_core::{CycleReport, RefreshCycle, Timestamp};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};

use crate::{SchedulerConfig, Trigger};

/// When the first cycle of a refresh task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Run a cycle as soon as the task starts, then follow the trigger.
    Immediate,
    /// Wait for the trigger's first firing.
    Deferred,
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for one refresh task.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// Total cycles started since the task began
    pub cycles: AtomicU64,

    /// Total cycles that returned an error
    pub failures: AtomicU64,

    /// Records returned by fetches of successful cycles
    pub records_fetched: AtomicU64,

    /// Records applied to the cache by successful cycles
    pub records_applied: AtomicU64,

    /// Records skipped by successful cycles (version mode only)
    pub records_skipped: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            records_fetched: self.records_fetched.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &CycleReport) {
        self.records_fetched
            .fetch_add(report.fetched as u64, Ordering::Relaxed);
        self.records_applied
            .fetch_add(report.applied as u64, Ordering::Relaxed);
        self.records_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub cycles: u64,
    pub failures: u64,
    pub records_fetched: u64,
    pub records_applied: u64,
    pub records_skipped: u64,
}

// ============================================================================
// TICKER
// ============================================================================

/// Turns a [`Trigger`] into a stream of firings.
enum Ticker {
    Interval(Interval),
    Cron {
        trigger: Trigger,
        last: Option<Timestamp>,
        fire_now: bool,
    },
}

impl Ticker {
    fn new(trigger: &Trigger, start: StartMode) -> Self {
        match trigger.period() {
            Some(period) => {
                let first = match start {
                    StartMode::Immediate => Instant::now(),
                    StartMode::Deferred => Instant::now() + period,
                };
                let mut ticker = interval_at(first, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Self::Interval(ticker)
            }
            None => Self::Cron {
                trigger: trigger.clone(),
                last: None,
                fire_now: start == StartMode::Immediate,
            },
        }
    }

    /// Wait for the next firing. `None` once the schedule has no more
    /// upcoming times.
    async fn tick(&mut self) -> Option<()> {
        match self {
            Self::Interval(ticker) => {
                ticker.tick().await;
                Some(())
            }
            Self::Cron {
                trigger,
                last,
                fire_now,
            } => {
                if std::mem::take(fire_now) {
                    *last = Some(Utc::now());
                    return Some(());
                }
                // Slots that passed while a cycle ran are skipped.
                let now = Utc::now();
                let base = (*last).map_or(now, |last| last.max(now));
                let next = trigger.next_fire_after(base)?;
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                sleep(delay).await;
                *last = Some(next);
                Some(())
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// REFRESH TASK
// ============================================================================

/// Spawn [`refresh_task`] onto the current runtime.
pub fn spawn_refresh_task(
    job: Arc<dyn RefreshCycle>,
    trigger: Trigger,
    start: StartMode,
    config: SchedulerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Arc<RefreshMetrics>> {
    tokio::spawn(refresh_task(job, trigger, start, config, shutdown_rx))
}

/// Run `job` on every firing of `trigger` until shutdown.
///
/// # Returns
///
/// Metrics collected during the task's lifetime
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let trigger = Trigger::parse("30s")?;
/// let handle = spawn_refresh_task(loader, trigger, StartMode::Immediate, config, shutdown_rx);
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// println!("Ran {} cycles", metrics.snapshot().cycles);
/// ```
pub async fn refresh_task(
    job: Arc<dyn RefreshCycle>,
    trigger: Trigger,
    start: StartMode,
    config: SchedulerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshMetrics> {
    let metrics = Arc::new(RefreshMetrics::new());
    let mut ticker = Ticker::new(&trigger, start);

    tracing::info!(
        loader = job.name(),
        trigger = %trigger,
        start = ?start,
        "Refresh task started"
    );

    loop {
        tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown_rx) => {
                tracing::info!(loader = job.name(), "Refresh task shutting down");
                break;
            }

            fired = ticker.tick() => {
                if fired.is_none() {
                    tracing::warn!(
                        loader = job.name(),
                        trigger = %trigger,
                        "Trigger has no upcoming firings"
                    );
                    wait_for_shutdown(&mut shutdown_rx).await;
                    break;
                }
                run_scheduled_cycle(job.as_ref(), &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        loader = job.name(),
        cycles = snapshot.cycles,
        failures = snapshot.failures,
        records_applied = snapshot.records_applied,
        "Refresh task completed"
    );

    metrics
}

/// Run one cycle and record its outcome.
async fn run_scheduled_cycle(
    job: &dyn RefreshCycle,
    config: &SchedulerConfig,
    metrics: &RefreshMetrics,
) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    match job.run_cycle().await {
        Ok(report) => {
            metrics.record(&report);
            if report.is_noop() {
                tracing::trace!(loader = job.name(), "Refresh cycle found no changes");
            } else {
                tracing::debug!(
                    loader = job.name(),
                    fetched = report.fetched,
                    applied = report.applied,
                    skipped = report.skipped,
                    "Refresh cycle completed"
                );
            }
        }
        Err(e) => {
            metrics.failures.fetch_add(1, Ordering::Relaxed);
            if config.log_failures {
                tracing::error!(loader = job.name(), error = %e, "Refresh cycle failed");
            } else {
                tracing::debug!(loader = job.name(), error = %e, "Refresh cycle failed");
            }
        }
    }
}

// ============================================================================
// CRON ACTIONS
// ============================================================================

/// Run `action` on every firing of `trigger`, each delayed by a random
/// amount up to `jitter`, until shutdown.
///
/// The task never fires on start. It returns how many times `action` ran.
pub fn spawn_cron_task<F>(
    name: impl Into<String>,
    trigger: Trigger,
    jitter: Duration,
    action: F,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<u64>
where
    F: Fn() + Send + Sync + 'static,
{
    let name = name.into();
    tokio::spawn(async move {
        let mut ticker = Ticker::new(&trigger, StartMode::Deferred);
        let mut fired = 0u64;

        tracing::info!(
            task = %name,
            trigger = %trigger,
            jitter_ms = jitter.as_millis() as u64,
            "Cron task started"
        );

        loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown_rx) => break,

                tick = ticker.tick() => {
                    if tick.is_none() {
                        wait_for_shutdown(&mut shutdown_rx).await;
                        break;
                    }
                    let delay = jitter_delay(jitter);
                    if !delay.is_zero() {
                        tracing::trace!(task = %name, delay_ms = delay.as_millis() as u64, "Delaying cron action");
                        tokio::select! {
                            biased;
                            _ = wait_for_shutdown(&mut shutdown_rx) => break,
                            _ = sleep(delay) => {}
                        }
                    }
                    action();
                    fired += 1;
                    tracing::debug!(task = %name, fired, "Cron action ran");
                }
            }
        }

        tracing::info!(task = %name, fired, "Cron task completed");
        fired
    })
}

/// Uniform random delay in `[0, max]`, at millisecond resolution.
pub fn jitter_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
