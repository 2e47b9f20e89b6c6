//! RIPPLE Test Utilities
//!
//! Centralized test infrastructure for the RIPPLE workspace:
//! - Record fixtures implementing both record capabilities
//! - Scripted sources and processors with call logs and failure switches
//! - Proptest generators for batches
//! - Custom assertions and test logging setup

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

// Re-export core types for convenience
pub use ripple_core::{
    ConcurrentCache, RefreshError, RippleError, RippleResult, SourceError, TimestampedRecord,
    Timestamp, VersionBatch, VersionFetcher, VersionedRecord, WatermarkFetcher,
    WatermarkProcessor,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Unix seconds to a [`Timestamp`], clamping unrepresentable values to the
/// epoch.
pub fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

// ============================================================================
// RECORD FIXTURES
// ============================================================================

/// A configuration row tracked by modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRow {
    pub name: String,
    pub value: String,
    pub mtime: Timestamp,
    pub deleted: bool,
}

impl ConfigRow {
    pub fn new(name: impl Into<String>, value: impl Into<String>, mtime_secs: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            mtime: ts(mtime_secs),
            deleted: false,
        }
    }

    /// Mark the row as a tombstone.
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

impl TimestampedRecord for ConfigRow {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtime(&self) -> Timestamp {
        self.mtime
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// A feature definition tracked by content hash.
///
/// `reported_hash` simulates a hash stamped by the source. It is not part
/// of the serialized form, so the content hash ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    pub payload: String,
    #[serde(skip)]
    pub reported_hash: Option<String>,
}

impl FeatureDef {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            reported_hash: None,
        }
    }

    pub fn with_reported_hash(mut self, hash: impl Into<String>) -> Self {
        self.reported_hash = Some(hash.into());
        self
    }
}

impl VersionedRecord for FeatureDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> Result<String, SourceError> {
        match &self.reported_hash {
            Some(hash) => Ok(hash.clone()),
            None => self.gen_hash(),
        }
    }
}

// ============================================================================
// SCRIPTED SOURCES
// ============================================================================

/// In-memory table of [`ConfigRow`]s served by modification time.
///
/// `fetch_since` returns every row newer than the watermark, oldest first,
/// and logs the watermark it was asked for.
#[derive(Debug, Default)]
pub struct ScriptedWatermarkSource {
    rows: Mutex<HashMap<String, ConfigRow>>,
    requests: Mutex<Vec<i64>>,
    failing: AtomicBool,
}

impl ScriptedWatermarkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = ConfigRow>) -> Self {
        let source = Self::new();
        for row in rows {
            source.upsert(row);
        }
        source
    }

    /// Insert or replace a row at the source.
    pub fn upsert(&self, row: ConfigRow) {
        locked(&self.rows).insert(row.name.clone(), row);
    }

    /// Make every fetch fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Watermarks passed to `fetch_since`, in call order.
    pub fn requests(&self) -> Vec<i64> {
        locked(&self.requests).clone()
    }
}

#[async_trait]
impl WatermarkFetcher<ConfigRow> for ScriptedWatermarkSource {
    async fn fetch_since(&self, watermark: i64) -> Result<Vec<ConfigRow>, SourceError> {
        locked(&self.requests).push(watermark);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable("scripted outage"));
        }
        let mut batch: Vec<ConfigRow> = locked(&self.rows)
            .values()
            .filter(|row| row.mtime_unix() > watermark)
            .cloned()
            .collect();
        batch.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.name.cmp(&b.name)));
        Ok(batch)
    }
}

/// Process step that upserts [`ConfigRow`]s and fails on chosen names.
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
    failing: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every record named `name` until [`ScriptedProcessor::heal`].
    pub fn fail_on(&self, name: impl Into<String>) {
        locked(&self.failing).insert(name.into());
    }

    pub fn heal(&self, name: &str) {
        locked(&self.failing).remove(name);
    }

    /// Names of every record offered to the processor, in call order.
    pub fn attempts(&self) -> Vec<String> {
        locked(&self.attempts).clone()
    }

    /// How many times a record named `name` was offered.
    pub fn attempts_for(&self, name: &str) -> usize {
        locked(&self.attempts).iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl WatermarkProcessor<ConfigRow> for ScriptedProcessor {
    async fn process(&self, row: &ConfigRow, cache: &ConcurrentCache) -> Result<i64, SourceError> {
        locked(&self.attempts).push(row.name.clone());
        if locked(&self.failing).contains(&row.name) {
            return Err(SourceError::rejected(format!("scripted failure for {}", row.name)));
        }
        cache.store(row.name.clone(), row.clone());
        Ok(row.mtime_unix())
    }
}

/// In-memory table of [`FeatureDef`]s served by content hash.
///
/// A key is returned when the hash the source reports for it differs from
/// the caller's known hash. The reported hash is the record's own hash
/// unless overridden with [`ScriptedVersionSource::report_hash`].
#[derive(Debug, Default)]
pub struct ScriptedVersionSource {
    defs: Mutex<HashMap<String, FeatureDef>>,
    reported: Mutex<HashMap<String, String>>,
    snapshots: Mutex<Vec<HashMap<String, String>>>,
    failing: AtomicBool,
}

impl ScriptedVersionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, def: FeatureDef) {
        locked(&self.defs).insert(def.name.clone(), def);
    }

    /// Report `hash` for `key` regardless of the record's contents.
    pub fn report_hash(&self, key: impl Into<String>, hash: impl Into<String>) {
        locked(&self.reported).insert(key.into(), hash.into());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hash snapshots passed to `fetch_changed`, in call order.
    pub fn snapshots(&self) -> Vec<HashMap<String, String>> {
        locked(&self.snapshots).clone()
    }
}

#[async_trait]
impl VersionFetcher<FeatureDef> for ScriptedVersionSource {
    async fn fetch_changed(
        &self,
        current: HashMap<String, String>,
    ) -> Result<VersionBatch<FeatureDef>, SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable("scripted outage"));
        }

        let defs = locked(&self.defs).clone();
        let reported = locked(&self.reported).clone();
        let mut batch = VersionBatch::new();
        for (key, def) in defs {
            let hash = match reported.get(&key) {
                Some(hash) => hash.clone(),
                None => def.hash()?,
            };
            if current.get(&key) != Some(&hash) {
                batch.insert(key, def, hash);
            }
        }

        locked(&self.snapshots).push(current);
        Ok(batch)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating RIPPLE records and batches.

    use super::*;
    use proptest::prelude::*;

    /// Generate a record name from a small alphabet so batches collide.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-e][0-9]"
    }

    /// Generate a modification time in Unix seconds.
    pub fn arb_mtime() -> impl Strategy<Value = i64> {
        1i64..10_000
    }

    /// Generate a live [`ConfigRow`].
    pub fn arb_config_row() -> impl Strategy<Value = ConfigRow> {
        (arb_name(), "[a-z]{0,8}", arb_mtime())
            .prop_map(|(name, value, mtime)| ConfigRow::new(name, value, mtime))
    }

    /// Generate a set of rows with unique names.
    pub fn arb_config_rows(max: usize) -> impl Strategy<Value = Vec<ConfigRow>> {
        prop::collection::hash_map(arb_name(), ("[a-z]{0,8}", arb_mtime()), 0..max).prop_map(
            |rows| {
                rows.into_iter()
                    .map(|(name, (value, mtime))| ConfigRow::new(name, value, mtime))
                    .collect()
            },
        )
    }

    /// Generate a [`FeatureDef`] with no reported hash.
    pub fn arb_feature_def() -> impl Strategy<Value = FeatureDef> {
        (arb_name(), "[a-z]{1,12}").prop_map(|(name, payload)| FeatureDef::new(name, payload))
    }

    /// Generate feature definitions with unique names, each paired with
    /// whether its reported hash should disagree with its content.
    pub fn arb_feature_defs(max: usize) -> impl Strategy<Value = Vec<(FeatureDef, bool)>> {
        prop::collection::hash_map(arb_name(), ("[a-z]{1,12}", any::<bool>()), 0..max).prop_map(
            |defs| {
                defs.into_iter()
                    .map(|(name, (payload, corrupt))| (FeatureDef::new(name, payload), corrupt))
                    .collect()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Common record sets.

    use super::*;

    /// Rows `A@10` and `B@20`.
    pub fn two_rows() -> Vec<ConfigRow> {
        vec![ConfigRow::new("A", "alpha", 10), ConfigRow::new("B", "beta", 20)]
    }

    pub fn search_feature() -> FeatureDef {
        FeatureDef::new("search", "{\"enabled\":true}")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for RIPPLE results.

    use super::*;

    /// Assert that a result is a fetch failure.
    pub fn assert_fetch_error<T: std::fmt::Debug>(result: &RippleResult<T>) {
        assert!(
            matches!(result, Err(RippleError::Refresh(RefreshError::Fetch { .. }))),
            "Expected fetch error, got {:?}",
            result
        );
    }

    /// Assert that a result is a process failure at `position`.
    pub fn assert_process_error_at<T: std::fmt::Debug>(result: &RippleResult<T>, position: usize) {
        match result {
            Err(RippleError::Refresh(RefreshError::Process { position: p, .. })) => {
                assert_eq!(*p, position, "Process failed at an unexpected position");
            }
            other => panic!("Expected process error, got {:?}", other),
        }
    }

    /// Assert that a result is an after-update hook failure.
    pub fn assert_after_update_error<T: std::fmt::Debug>(result: &RippleResult<T>) {
        assert!(
            matches!(
                result,
                Err(RippleError::Refresh(RefreshError::AfterUpdate { .. }))
            ),
            "Expected after-update error, got {:?}",
            result
        );
    }

    /// Assert that `cache` holds `row` under its name.
    pub fn assert_cached_row(cache: &ConcurrentCache, row: &ConfigRow) {
        let cached = cache.load_as::<ConfigRow>(&row.name);
        assert_eq!(cached.as_deref(), Some(row), "Row {} not cached", row.name);
    }
}

// ============================================================================
// LOGGING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
