//! RIPPLE Core - Contracts
//!
//! Types shared by every RIPPLE crate: the concurrent cache, record
//! capabilities, fetch/process strategies, the refresh-cycle trait and the
//! error taxonomy. No scheduling and no loader logic lives here.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub mod cache;
pub mod cycle;
pub mod error;
pub mod record;
pub mod strategy;

pub use cache::{CachedValue, ConcurrentCache};
pub use cycle::{CycleReport, RefreshCycle};
pub use error::{ConfigError, RefreshError, RippleError, RippleResult, SourceError};
pub use record::{TimestampedRecord, VersionedRecord};
pub use strategy::{
    after_update_fn, fetch_fn, process_fn, record_hook_fn, version_fetch_fn, version_process_fn,
    AfterUpdateFn, AfterUpdateHook, FetchFn, ProcessFn, RecordHook, RecordHookFn, VersionBatch,
    VersionFetchFn, VersionFetcher, VersionProcessFn, VersionProcessor, WatermarkFetcher,
    WatermarkProcessor,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Compute the lowercase hex SHA-256 of content.
pub fn content_hash_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: the hash is deterministic, fixed-width lowercase hex.
        #[test]
        fn prop_content_hash_is_stable_hex(content in proptest::collection::vec(any::<u8>(), 0..256)) {
            let a = content_hash_hex(&content);
            let b = content_hash_hex(&content);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), 64);
            prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
