//! Version-hash loader.
//!
//! Keeps the last applied content hash per key. Each cycle hands a snapshot
//! of those hashes to the fetcher, which returns only the records whose
//! hash changed at the source. Every changed record is processed on its
//! own: a success advances that key's hash, a failure leaves it alone and
//! the next cycle offers the record again.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ripple_core::{
    ConcurrentCache, CycleReport, RefreshCycle, RefreshError, RippleResult, VersionBatch,
    VersionFetcher, VersionProcessor, VersionedRecord,
};
use ripple_scheduler::{spawn_refresh_task, RefreshMetrics, SchedulerConfig, StartMode, Trigger};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::processors::VerifyingProcessor;
use crate::{read_lock, write_lock};

/// Incremental loader driven by per-key content hashes.
pub struct VersionLoader<T: Send + Sync + 'static> {
    name: String,
    trigger: Trigger,
    config: SchedulerConfig,
    cache: Arc<ConcurrentCache>,
    fetcher: Arc<dyn VersionFetcher<T>>,
    processor: Arc<dyn VersionProcessor<T>>,
    hashes: RwLock<HashMap<String, String>>,
}

impl<T: VersionedRecord> VersionLoader<T> {
    /// Loader that only accepts records whose own hash matches the hash the
    /// source reported. See [`VerifyingProcessor`].
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        fetcher: Arc<dyn VersionFetcher<T>>,
    ) -> Self {
        Self::with_processor(name, trigger, fetcher, Arc::new(VerifyingProcessor))
    }
}

impl<T: Send + Sync + 'static> VersionLoader<T> {
    /// Loader with a caller-supplied process step. The step is handed each
    /// record's batch key and must cache the record under it.
    pub fn with_processor(
        name: impl Into<String>,
        trigger: Trigger,
        fetcher: Arc<dyn VersionFetcher<T>>,
        processor: Arc<dyn VersionProcessor<T>>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            config: SchedulerConfig::default(),
            cache: Arc::new(ConcurrentCache::new()),
            fetcher,
            processor,
            hashes: RwLock::new(HashMap::new()),
        }
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

    pub fn cache(&self) -> &Arc<ConcurrentCache> {
        &self.cache
    }

    /// Typed read. `None` when the key is absent or holds another type.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.cache.load_as(key)
    }

    /// The hash last applied for `key`.
    pub fn stored_hash(&self, key: &str) -> Option<String> {
        read_lock(&self.hashes).get(key).cloned()
    }

    /// Snapshot of every applied hash.
    pub fn hashes(&self) -> HashMap<String, String> {
        read_lock(&self.hashes).clone()
    }

    /// Run one refresh cycle now. Only a fetch failure fails the cycle.
    pub async fn refresh(&self) -> RippleResult<()> {
        self.cycle().await.map(|_| ())
    }

    #[tracing::instrument(name = "version_cycle", skip(self), fields(loader = %self.name))]
    async fn cycle(&self) -> RippleResult<CycleReport> {
        let known = self.hashes();

        let VersionBatch { records, hashes } = self
            .fetcher
            .fetch_changed(known)
            .await
            .map_err(|source| RefreshError::Fetch {
                loader: self.name.clone(),
                source,
            })?;

        if records.is_empty() {
            tracing::trace!("No records changed");
            return Ok(CycleReport::default());
        }

        let mut report = CycleReport {
            fetched: records.len(),
            ..CycleReport::default()
        };

        for (key, record) in records {
            let source_hash = hashes.get(&key).map(String::as_str).unwrap_or_default();
            let outcome = self
                .processor
                .process(&key, record, source_hash, &self.cache)
                .await;
            match outcome {
                Ok(applied) => {
                    write_lock(&self.hashes).insert(key, applied);
                    report.applied += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping changed record");
                    report.skipped += 1;
                }
            }
        }

        if report.applied > 0 {
            tracing::info!(
                applied = report.applied,
                skipped = report.skipped,
                "Applied changed records"
            );
        }

        Ok(report)
    }

    /// Schedule cycles on the loader's trigger, starting with one right away.
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
}

#[async_trait]
impl<T: Send + Sync + 'static> RefreshCycle for VersionLoader<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_cycle(&self) -> RippleResult<CycleReport> {
        self.cycle().await
    }
}
