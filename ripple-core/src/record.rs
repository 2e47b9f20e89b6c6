//! Record capabilities the loaders rely on.
//!
//! Loaders never inspect record payloads. They only need an identity, and
//! depending on the refresh strategy either a modification instant or a
//! content hash.

use serde::{de::DeserializeOwned, Serialize};

use crate::{content_hash_hex, SourceError, Timestamp};

/// A record whose changes are tracked by modification time.
///
/// Used by the watermark loader: the source returns every record whose
/// `mtime` is newer than the current watermark.
pub trait TimestampedRecord: Send + Sync + 'static {
    /// Unique identity of the record, used as its cache key.
    fn name(&self) -> &str;

    /// When the record was last modified at the source.
    fn mtime(&self) -> Timestamp;

    /// Whether the source marked this record as deleted.
    fn is_deleted(&self) -> bool;

    /// Modification instant as Unix seconds, the watermark unit.
    fn mtime_unix(&self) -> i64 {
        self.mtime().timestamp()
    }
}

/// A record whose changes are tracked by content hash.
///
/// Used by the version loader: the source compares the loader's known hashes
/// against its own and returns only the records that differ.
///
/// The default hash is the hex SHA-256 of the record's JSON encoding.
/// Records that carry a hash assigned by the source should override
/// [`VersionedRecord::hash`] and keep that field out of the serialized form.
pub trait VersionedRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique identity of the record, used as its cache key.
    fn name(&self) -> &str;

    /// Recompute the content hash from the record's current contents.
    fn gen_hash(&self) -> Result<String, SourceError> {
        let bytes = self.marshal()?;
        Ok(content_hash_hex(&bytes))
    }

    /// The record's current hash.
    fn hash(&self) -> Result<String, SourceError> {
        self.gen_hash()
    }

    /// Serialize the record to bytes.
    fn marshal(&self) -> Result<Vec<u8>, SourceError> {
        serde_json::to_vec(self).map_err(|e| SourceError::Malformed {
            key: self.name().to_string(),
            reason: e.to_string(),
        })
    }

    /// Deserialize a record from bytes produced by [`VersionedRecord::marshal`].
    fn unmarshal(src: &[u8]) -> Result<Self, SourceError>
    where
        Self: Sized,
    {
        serde_json::from_slice(src).map_err(|e| SourceError::Undecodable {
            reason: e.to_string(),
        })
    }
}
