//! Pluggable strategies consumed by the loaders.
//!
//! One trait per role: fetch a batch, process one record, and (watermark
//! mode only) run a hook after the whole batch applied. Implement the traits
//! on a type, or wrap a closure with the `*_fn` adapters.
//!
//! Strategies are awaited without any lock held and without a timeout. A
//! strategy that needs a deadline must enforce it itself.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;

use crate::{ConcurrentCache, SourceError};

// ============================================================================
// WATERMARK MODE
// ============================================================================

/// Fetches every record modified after a watermark.
#[async_trait]
pub trait WatermarkFetcher<R: Send + Sync + 'static>: Send + Sync {
    /// Return the records changed since `watermark` (Unix seconds), in the
    /// order they should be applied. Zero means "everything".
    async fn fetch_since(&self, watermark: i64) -> Result<Vec<R>, SourceError>;
}

/// Applies one fetched record to the cache.
///
/// Must be idempotent: a failed cycle re-delivers the whole batch, including
/// records this processor already applied.
#[async_trait]
pub trait WatermarkProcessor<R: Send + Sync + 'static>: Send + Sync {
    /// Write the record into `cache` and return its modification instant in
    /// Unix seconds.
    async fn process(&self, record: &R, cache: &ConcurrentCache) -> Result<i64, SourceError>;
}

/// Runs once after every record of a batch processed successfully.
///
/// A failure keeps the watermark where it was.
#[async_trait]
pub trait AfterUpdateHook<R: Send + Sync + 'static>: Send + Sync {
    async fn after_update(&self, batch: &[R], count: usize) -> Result<(), SourceError>;
}

/// Side effect applied to a timestamped record before its instant is taken.
#[async_trait]
pub trait RecordHook<R: Send + Sync + 'static>: Send + Sync {
    async fn apply(&self, record: &R, cache: &ConcurrentCache) -> Result<(), SourceError>;
}

// ============================================================================
// VERSION MODE
// ============================================================================

/// Records that changed relative to the loader's known hashes.
#[derive(Debug, Clone)]
pub struct VersionBatch<T> {
    /// Changed records keyed by identity.
    pub records: HashMap<String, T>,
    /// The source's hash for each changed record.
    pub hashes: HashMap<String, String>,
}

impl<T> VersionBatch<T> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            hashes: HashMap::new(),
        }
    }

    /// Add a changed record and the hash the source reports for it.
    pub fn insert(&mut self, key: impl Into<String>, record: T, hash: impl Into<String>) {
        let key = key.into();
        self.hashes.insert(key.clone(), hash.into());
        self.records.insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for VersionBatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetches the records whose hash differs from the loader's view.
#[async_trait]
pub trait VersionFetcher<T: Send + 'static>: Send + Sync {
    /// `current` maps each known key to its last applied hash.
    async fn fetch_changed(
        &self,
        current: HashMap<String, String>,
    ) -> Result<VersionBatch<T>, SourceError>;
}

/// Applies one changed record to the cache.
///
/// A failure skips only this key; its previously stored hash stays.
#[async_trait]
pub trait VersionProcessor<T: Send + 'static>: Send + Sync {
    /// Write the record into `cache` under `key` and return the hash to
    /// remember for that key. `source_hash` is what the source reported, or
    /// empty if it reported nothing for this key.
    async fn process(
        &self,
        key: &str,
        record: T,
        source_hash: &str,
        cache: &ConcurrentCache,
    ) -> Result<String, SourceError>;
}

// ============================================================================
// CLOSURE ADAPTERS
// ============================================================================

/// Watermark fetcher backed by an async closure. See [`fetch_fn`].
pub struct FetchFn<F>(F);

/// Wrap `f(watermark)` as a [`WatermarkFetcher`].
pub fn fetch_fn<R, F, Fut>(f: F) -> FetchFn<F>
where
    F: Fn(i64) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<R>, SourceError>> + Send,
{
    FetchFn(f)
}

#[async_trait]
impl<R, F, Fut> WatermarkFetcher<R> for FetchFn<F>
where
    R: Send + Sync + 'static,
    F: Fn(i64) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<R>, SourceError>> + Send,
{
    async fn fetch_since(&self, watermark: i64) -> Result<Vec<R>, SourceError> {
        (self.0)(watermark).await
    }
}

/// Version fetcher backed by an async closure. See [`version_fetch_fn`].
pub struct VersionFetchFn<F>(F);

/// Wrap `f(current_hashes)` as a [`VersionFetcher`].
pub fn version_fetch_fn<T, F, Fut>(f: F) -> VersionFetchFn<F>
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<VersionBatch<T>, SourceError>> + Send,
{
    VersionFetchFn(f)
}

#[async_trait]
impl<T, F, Fut> VersionFetcher<T> for VersionFetchFn<F>
where
    T: Send + 'static,
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<VersionBatch<T>, SourceError>> + Send,
{
    async fn fetch_changed(
        &self,
        current: HashMap<String, String>,
    ) -> Result<VersionBatch<T>, SourceError> {
        (self.0)(current).await
    }
}

/// Watermark processor backed by a synchronous closure. See [`process_fn`].
pub struct ProcessFn<F>(F);

/// Wrap `f(record, cache) -> instant` as a [`WatermarkProcessor`].
pub fn process_fn<R, F>(f: F) -> ProcessFn<F>
where
    F: Fn(&R, &ConcurrentCache) -> Result<i64, SourceError> + Send + Sync,
{
    ProcessFn(f)
}

#[async_trait]
impl<R, F> WatermarkProcessor<R> for ProcessFn<F>
where
    R: Send + Sync + 'static,
    F: Fn(&R, &ConcurrentCache) -> Result<i64, SourceError> + Send + Sync,
{
    async fn process(&self, record: &R, cache: &ConcurrentCache) -> Result<i64, SourceError> {
        (self.0)(record, cache)
    }
}

/// Version processor backed by a synchronous closure. See [`version_process_fn`].
pub struct VersionProcessFn<F>(F);

/// Wrap `f(key, record, source_hash, cache) -> hash` as a [`VersionProcessor`].
pub fn version_process_fn<T, F>(f: F) -> VersionProcessFn<F>
where
    F: Fn(&str, T, &str, &ConcurrentCache) -> Result<String, SourceError> + Send + Sync,
{
    VersionProcessFn(f)
}

#[async_trait]
impl<T, F> VersionProcessor<T> for VersionProcessFn<F>
where
    T: Send + 'static,
    F: Fn(&str, T, &str, &ConcurrentCache) -> Result<String, SourceError> + Send + Sync,
{
    async fn process(
        &self,
        key: &str,
        record: T,
        source_hash: &str,
        cache: &ConcurrentCache,
    ) -> Result<String, SourceError> {
        (self.0)(key, record, source_hash, cache)
    }
}

/// Record hook backed by a synchronous closure. See [`record_hook_fn`].
pub struct RecordHookFn<F>(F);

/// Wrap `f(record, cache)` as a [`RecordHook`].
pub fn record_hook_fn<R, F>(f: F) -> RecordHookFn<F>
where
    F: Fn(&R, &ConcurrentCache) -> Result<(), SourceError> + Send + Sync,
{
    RecordHookFn(f)
}

#[async_trait]
impl<R, F> RecordHook<R> for RecordHookFn<F>
where
    R: Send + Sync + 'static,
    F: Fn(&R, &ConcurrentCache) -> Result<(), SourceError> + Send + Sync,
{
    async fn apply(&self, record: &R, cache: &ConcurrentCache) -> Result<(), SourceError> {
        (self.0)(record, cache)
    }
}

/// After-update hook backed by a synchronous closure. See [`after_update_fn`].
pub struct AfterUpdateFn<F>(F);

/// Wrap `f(batch, count)` as an [`AfterUpdateHook`].
pub fn after_update_fn<R, F>(f: F) -> AfterUpdateFn<F>
where
    F: Fn(&[R], usize) -> Result<(), SourceError> + Send + Sync,
{
    AfterUpdateFn(f)
}

#[async_trait]
impl<R, F> AfterUpdateHook<R> for AfterUpdateFn<F>
where
    R: Send + Sync + 'static,
    F: Fn(&[R], usize) -> Result<(), SourceError> + Send + Sync,
{
    async fn after_update(&self, batch: &[R], count: usize) -> Result<(), SourceError> {
        (self.0)(batch, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_fn_passes_watermark() {
        let fetcher = fetch_fn(|watermark: i64| async move {
            Ok::<_, SourceError>(vec![watermark, watermark + 1])
        });
        let batch = fetcher.fetch_since(5).await.unwrap();
        assert_eq!(batch, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_version_fetch_fn_sees_snapshot() {
        let fetcher = version_fetch_fn(|current: HashMap<String, String>| async move {
            let mut batch = VersionBatch::new();
            if !current.contains_key("k") {
                batch.insert("k", 1u8, "h1");
            }
            Ok::<_, SourceError>(batch)
        });

        let first = fetcher.fetch_changed(HashMap::new()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.hashes.get("k").map(String::as_str), Some("h1"));

        let known = HashMap::from([("k".to_string(), "h1".to_string())]);
        let second = fetcher.fetch_changed(known).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_process_fn_writes_cache() {
        let processor = process_fn(|record: &(String, i64), cache: &ConcurrentCache| {
            cache.store(record.0.clone(), record.1);
            Ok(record.1)
        });
        let cache = ConcurrentCache::new();

        let instant = processor
            .process(&("a".to_string(), 42), &cache)
            .await
            .unwrap();
        assert_eq!(instant, 42);
        assert_eq!(cache.load_as::<i64>("a").as_deref(), Some(&42));
    }

    #[tokio::test]
    async fn test_version_process_fn_error_passthrough() {
        let processor = version_process_fn(
            |key: &str, _record: u8, source_hash: &str, _cache: &ConcurrentCache| {
                Err(SourceError::rejected(format!("refuse {key}@{source_hash}")))
            },
        );
        let cache = ConcurrentCache::new();

        let err = processor.process("k", 1, "h1", &cache).await.unwrap_err();
        assert_eq!(err, SourceError::rejected("refuse k@h1"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_hook_adapters() {
        let hook = record_hook_fn(|record: &u32, cache: &ConcurrentCache| {
            cache.store(record.to_string(), *record);
            Ok(())
        });
        let after = after_update_fn(|batch: &[u32], count: usize| {
            if batch.len() == count {
                Ok(())
            } else {
                Err(SourceError::rejected("count mismatch"))
            }
        });
        let cache = ConcurrentCache::new();

        hook.apply(&9, &cache).await.unwrap();
        assert!(cache.contains_key("9"));
        after.after_update(&[1, 2, 3], 3).await.unwrap();
        assert!(after.after_update(&[1], 2).await.is_err());
    }

    #[test]
    fn test_version_batch_insert() {
        let mut batch = VersionBatch::default();
        assert!(batch.is_empty());
        batch.insert("a", "record", "h1");
        batch.insert("a", "record2", "h2");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records.get("a"), Some(&"record2"));
        assert_eq!(batch.hashes.get("a").map(String::as_str), Some("h2"));
    }
}
