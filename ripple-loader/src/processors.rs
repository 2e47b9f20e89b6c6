//! Default process steps.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use ripple_core::{
    ConcurrentCache, RecordHook, SourceError, TimestampedRecord, VersionProcessor,
    VersionedRecord, WatermarkProcessor,
};

/// Process step for [`TimestampedRecord`] batches.
///
/// Without a hook it upserts each record under its `name()`, tombstones
/// included. With a hook the hook owns the cache write. Either way the
/// record's `mtime` is returned as the watermark candidate.
pub struct TimestampedProcessor<R: Send + Sync + 'static> {
    hook: Option<Arc<dyn RecordHook<R>>>,
    _record: PhantomData<fn(&R)>,
}

impl<R: TimestampedRecord> TimestampedProcessor<R> {
    pub fn new() -> Self {
        Self {
            hook: None,
            _record: PhantomData,
        }
    }

    /// Replace the default upsert with `hook`.
    pub fn with_hook(hook: Arc<dyn RecordHook<R>>) -> Self {
        Self {
            hook: Some(hook),
            _record: PhantomData,
        }
    }
}

impl<R: TimestampedRecord> Default for TimestampedProcessor<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> WatermarkProcessor<R> for TimestampedProcessor<R>
where
    R: TimestampedRecord + Clone,
{
    async fn process(&self, record: &R, cache: &ConcurrentCache) -> Result<i64, SourceError> {
        match &self.hook {
            Some(hook) => hook.apply(record, cache).await?,
            None => cache.store(record.name(), record.clone()),
        }
        Ok(record.mtime_unix())
    }
}

/// Process step for [`VersionedRecord`] values.
///
/// Accepts a record only when it was delivered under its own `name()` and
/// its hash matches the hash the source reported for it, then upserts it
/// under that name. The stored hash and the cached value therefore always
/// share one key.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyingProcessor;

#[async_trait]
impl<T: VersionedRecord> VersionProcessor<T> for VerifyingProcessor {
    async fn process(
        &self,
        key: &str,
        record: T,
        source_hash: &str,
        cache: &ConcurrentCache,
    ) -> Result<String, SourceError> {
        if record.name() != key {
            return Err(SourceError::KeyMismatch {
                key: key.to_string(),
                name: record.name().to_string(),
            });
        }
        let hash = record.hash()?;
        if hash != source_hash {
            return Err(SourceError::VersionMismatch {
                key: key.to_string(),
                expected: source_hash.to_string(),
                actual: hash,
            });
        }
        cache.store(key.to_string(), record);
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::record_hook_fn;
    use ripple_test_utils::{ConfigRow, FeatureDef};

    #[tokio::test]
    async fn test_timestamped_default_upserts() {
        let processor = TimestampedProcessor::<ConfigRow>::new();
        let cache = ConcurrentCache::new();
        let row = ConfigRow::new("timeout", "30", 1_000);

        let instant = processor.process(&row, &cache).await.unwrap();

        assert_eq!(instant, 1_000);
        assert_eq!(cache.load_as::<ConfigRow>("timeout").as_deref(), Some(&row));
    }

    #[tokio::test]
    async fn test_timestamped_default_keeps_tombstones() {
        let processor = TimestampedProcessor::<ConfigRow>::new();
        let cache = ConcurrentCache::new();
        let row = ConfigRow::new("timeout", "30", 1_000).deleted();

        processor.process(&row, &cache).await.unwrap();

        let cached = cache.load_as::<ConfigRow>("timeout").unwrap();
        assert!(cached.deleted);
    }

    #[tokio::test]
    async fn test_timestamped_hook_owns_write() {
        let hook = record_hook_fn(|row: &ConfigRow, cache: &ConcurrentCache| {
            if row.deleted {
                cache.remove(&row.name);
            } else {
                cache.store(row.name.clone(), row.value.clone());
            }
            Ok(())
        });
        let processor = TimestampedProcessor::<ConfigRow>::with_hook(Arc::new(hook));
        let cache = ConcurrentCache::new();

        processor
            .process(&ConfigRow::new("a", "1", 10), &cache)
            .await
            .unwrap();
        assert_eq!(cache.load_as::<String>("a").as_deref().map(String::as_str), Some("1"));

        let instant = processor
            .process(&ConfigRow::new("a", "1", 20).deleted(), &cache)
            .await
            .unwrap();
        assert_eq!(instant, 20);
        assert!(!cache.contains_key("a"));
    }

    #[tokio::test]
    async fn test_timestamped_hook_error_propagates() {
        let hook = record_hook_fn(|_row: &ConfigRow, _cache: &ConcurrentCache| {
            Err(SourceError::rejected("read only"))
        });
        let processor = TimestampedProcessor::<ConfigRow>::with_hook(Arc::new(hook));
        let cache = ConcurrentCache::new();

        let err = processor
            .process(&ConfigRow::new("a", "1", 10), &cache)
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::rejected("read only"));
    }

    #[tokio::test]
    async fn test_verifying_accepts_matching_hash() {
        let cache = ConcurrentCache::new();
        let def = FeatureDef::new("search", "v1").with_reported_hash("h2");

        let stored = VerifyingProcessor
            .process("search", def, "h2", &cache)
            .await
            .unwrap();

        assert_eq!(stored, "h2");
        assert!(cache.load_as::<FeatureDef>("search").is_some());
    }

    #[tokio::test]
    async fn test_verifying_rejects_mismatch() {
        let cache = ConcurrentCache::new();
        let def = FeatureDef::new("search", "v1").with_reported_hash("h3");

        let err = VerifyingProcessor
            .process("search", def, "h2", &cache)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SourceError::VersionMismatch {
                key: "search".to_string(),
                expected: "h2".to_string(),
                actual: "h3".to_string(),
            }
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_verifying_uses_content_hash_by_default() {
        let cache = ConcurrentCache::new();
        let def = FeatureDef::new("search", "v1");
        let content_hash = def.gen_hash().unwrap();

        let stored = VerifyingProcessor
            .process("search", def, &content_hash, &cache)
            .await
            .unwrap();
        assert_eq!(stored, content_hash);
    }

    #[tokio::test]
    async fn test_verifying_rejects_record_under_foreign_key() {
        let cache = ConcurrentCache::new();
        let def = FeatureDef::new("search", "v1");
        let content_hash = def.gen_hash().unwrap();

        let err = VerifyingProcessor
            .process("features/search", def, &content_hash, &cache)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SourceError::KeyMismatch {
                key: "features/search".to_string(),
                name: "search".to_string(),
            }
        );
        assert!(cache.is_empty());
    }
}
