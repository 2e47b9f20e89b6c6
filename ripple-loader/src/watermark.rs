//! Watermark loader.
//!
//! Keeps one modification-time watermark (Unix seconds). Each cycle fetches
//! every record newer than the watermark, processes the batch in order and
//! moves the watermark to the newest instant seen. Any failure leaves the
//! watermark where it was, so the whole batch is delivered again next cycle.
//! Process steps must therefore be idempotent.

use std::any::Any;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use chrono::Utc;
use ripple_core::{
    AfterUpdateHook, CachedValue, ConcurrentCache, CycleReport, RefreshCycle, RefreshError,
    RippleResult, TimestampedRecord, Timestamp, WatermarkFetcher, WatermarkProcessor,
};
use ripple_scheduler::{
    spawn_cron_task, spawn_refresh_task, RefreshMetrics, SchedulerConfig, StartMode, Trigger,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::processors::TimestampedProcessor;
use crate::{read_lock, write_lock};

/// Incremental loader driven by a modification-time watermark.
pub struct WatermarkLoader<R: Send + Sync + 'static> {
    name: String,
    trigger: Trigger,
    config: SchedulerConfig,
    cache: Arc<ConcurrentCache>,
    fetcher: Arc<dyn WatermarkFetcher<R>>,
    processor: Arc<dyn WatermarkProcessor<R>>,
    after_update: Option<Arc<dyn AfterUpdateHook<R>>>,
    time_offset: RwLock<i64>,
    last_cycle_started: RwLock<Option<Timestamp>>,
}

impl<R: TimestampedRecord + Clone> WatermarkLoader<R> {
    /// Loader for [`TimestampedRecord`] batches that upserts each record
    /// under its name. See [`TimestampedProcessor`].
    pub fn timestamped(
        name: impl Into<String>,
        trigger: Trigger,
        fetcher: Arc<dyn WatermarkFetcher<R>>,
    ) -> Self {
        Self::new(
            name,
            trigger,
            fetcher,
            Arc::new(TimestampedProcessor::<R>::new()),
        )
    }
}

impl<R: Send + Sync + 'static> WatermarkLoader<R> {
    /// Create a loader with an empty cache and a zero watermark.
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        fetcher: Arc<dyn WatermarkFetcher<R>>,
        processor: Arc<dyn WatermarkProcessor<R>>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            config: SchedulerConfig::default(),
            cache: Arc::new(ConcurrentCache::new()),
            fetcher,
            processor,
            after_update: None,
            time_offset: RwLock::new(0),
            last_cycle_started: RwLock::new(None),
        }
    }

    /// Run `hook` once per cycle after the whole batch processed.
    pub fn with_after_update(mut self, hook: Arc<dyn AfterUpdateHook<R>>) -> Self {
        self.after_update = Some(hook);
        self
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The cache this loader writes to.
    pub fn cache(&self) -> &Arc<ConcurrentCache> {
        &self.cache
    }

    /// Current watermark in Unix seconds.
    pub fn time_offset(&self) -> i64 {
        *read_lock(&self.time_offset)
    }

    /// Overwrite the watermark. Unlike a cycle's advance this may move it
    /// backwards.
    pub fn set_time_offset(&self, offset: i64) {
        *write_lock(&self.time_offset) = offset;
    }

    /// Zero the watermark so the next cycle fetches everything.
    pub fn reset_watermark(&self) {
        self.set_time_offset(0);
        tracing::info!(loader = %self.name, "Watermark reset");
    }

    /// When the most recent cycle started, if any has.
    pub fn last_cycle_started(&self) -> Option<Timestamp> {
        *read_lock(&self.last_cycle_started)
    }

    pub fn get(&self, key: &str) -> Option<CachedValue> {
        self.cache.load(key)
    }

    /// Typed read. `None` when the key is absent or holds another type.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.cache.load_as(key)
    }

    /// Run one refresh cycle now.
    pub async fn refresh(&self) -> RippleResult<()> {
        self.cycle().await.map(|_| ())
    }

    #[tracing::instrument(name = "watermark_cycle", skip(self), fields(loader = %self.name))]
    async fn cycle(&self) -> RippleResult<CycleReport> {
        *write_lock(&self.last_cycle_started) = Some(Utc::now());
        let watermark = self.time_offset();

        let batch = self
            .fetcher
            .fetch_since(watermark)
            .await
            .map_err(|source| RefreshError::Fetch {
                loader: self.name.clone(),
                source,
            })?;

        if batch.is_empty() {
            tracing::trace!(watermark, "No records changed since watermark");
            return Ok(CycleReport::default());
        }

        let mut newest = watermark;
        for (position, record) in batch.iter().enumerate() {
            let instant = self
                .processor
                .process(record, &self.cache)
                .await
                .map_err(|source| RefreshError::Process {
                    loader: self.name.clone(),
                    position,
                    source,
                })?;
            newest = newest.max(instant);
        }

        if let Some(hook) = &self.after_update {
            hook.after_update(&batch, batch.len())
                .await
                .map_err(|source| RefreshError::AfterUpdate {
                    loader: self.name.clone(),
                    source,
                })?;
        }

        let advanced = {
            let mut offset = write_lock(&self.time_offset);
            *offset = (*offset).max(newest);
            *offset
        };

        tracing::info!(
            records = batch.len(),
            from = watermark,
            watermark = advanced,
            "Applied changed records"
        );

        Ok(CycleReport {
            fetched: batch.len(),
            applied: batch.len(),
            skipped: 0,
        })
    }

    /// Schedule cycles on the loader's trigger, starting with one right away.
    /// Failures are logged and retried on the next firing.
    pub fn start(
        self: &Arc<Self>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<Arc<RefreshMetrics>> {
        spawn_refresh_task(
            Arc::clone(self) as Arc<dyn RefreshCycle>,
            self.trigger.clone(),
            StartMode::Immediate,
            self.config.clone(),
            shutdown_rx,
        )
    }

    /// Run one cycle now and schedule the rest only if it succeeds.
    ///
    /// The first scheduled cycle runs one trigger period after this returns.
    pub async fn try_start(
        self: &Arc<Self>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> RippleResult<JoinHandle<Arc<RefreshMetrics>>> {
        self.refresh().await?;
        Ok(spawn_refresh_task(
            Arc::clone(self) as Arc<dyn RefreshCycle>,
            self.trigger.clone(),
            StartMode::Deferred,
            self.config.clone(),
            shutdown_rx,
        ))
    }

    /// Zero the watermark on every firing of `schedule`, delayed by up to
    /// the configured reset jitter, forcing periodic full resyncs.
    ///
    /// The task holds only a weak reference and stops resetting once the
    /// loader is dropped.
    pub fn reset_watermark_with_cron(
        self: &Arc<Self>,
        schedule: &str,
        shutdown_rx: watch::Receiver<bool>,
    ) -> RippleResult<JoinHandle<u64>> {
        let trigger = Trigger::parse(schedule)?;
        let loader: Weak<Self> = Arc::downgrade(self);
        Ok(spawn_cron_task(
            format!("{}.reset", self.name),
            trigger,
            self.config.reset_jitter,
            move || {
                if let Some(loader) = loader.upgrade() {
                    loader.reset_watermark();
                }
            },
            shutdown_rx,
        ))
    }
}

#[async_trait]
impl<R: Send + Sync + 'static> RefreshCycle for WatermarkLoader<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_cycle(&self) -> RippleResult<CycleReport> {
        self.cycle().await
    }
}
