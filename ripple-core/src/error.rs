//! Error types for RIPPLE operations

use thiserror::Error;

/// Errors raised by caller-supplied strategies (fetch, process, hooks).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Malformed record {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("Undecodable record bytes: {reason}")]
    Undecodable { reason: String },

    #[error("Record {name:?} delivered under key {key:?}")]
    KeyMismatch { key: String, name: String },

    #[error("Version check failed for {key}: source reported {expected:?}, record hashes to {actual:?}")]
    VersionMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Rejected: {reason}")]
    Rejected { reason: String },
}

impl SourceError {
    /// Shorthand for an unavailable source.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for a rejected record or batch.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Refresh-cycle errors. Any of these means the progress marker did not move.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Loader {loader} failed to load updated data: {source}")]
    Fetch { loader: String, source: SourceError },

    #[error("Loader {loader} failed to process record {position}: {source}")]
    Process {
        loader: String,
        position: usize,
        source: SourceError,
    },

    #[error("Loader {loader} after-update hook failed: {source}")]
    AfterUpdate { loader: String, source: SourceError },
}

impl RefreshError {
    /// Name of the loader whose cycle failed.
    pub fn loader(&self) -> &str {
        match self {
            Self::Fetch { loader, .. }
            | Self::Process { loader, .. }
            | Self::AfterUpdate { loader, .. } => loader,
        }
    }
}

/// Configuration errors, reported when a trigger or option is registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid interval {value:?}: {reason}")]
    InvalidInterval { value: String, reason: String },

    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all RIPPLE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RippleError {
    #[error("Refresh error: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for RIPPLE operations.
pub type RippleResult<T> = Result<T, RippleError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display_version_mismatch() {
        let err = SourceError::VersionMismatch {
            key: "feature.search".to_string(),
            expected: "h2".to_string(),
            actual: "h3".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Version check failed"));
        assert!(msg.contains("feature.search"));
        assert!(msg.contains("h2"));
        assert!(msg.contains("h3"));
    }

    #[test]
    fn test_source_error_display_undecodable_has_no_empty_key() {
        let err = SourceError::Undecodable {
            reason: "EOF while parsing".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Undecodable record bytes: EOF while parsing"
        );
    }

    #[test]
    fn test_source_error_display_key_mismatch() {
        let err = SourceError::KeyMismatch {
            key: "features/search".to_string(),
            name: "search".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("\"features/search\""));
        assert!(msg.contains("\"search\""));
    }

    #[test]
    fn test_refresh_error_display_process() {
        let err = RefreshError::Process {
            loader: "config_rows".to_string(),
            position: 3,
            source: SourceError::rejected("bad row"),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("config_rows"));
        assert!(msg.contains("record 3"));
        assert!(msg.contains("bad row"));
    }

    #[test]
    fn test_refresh_error_loader_name() {
        let fetch = RefreshError::Fetch {
            loader: "a".to_string(),
            source: SourceError::unavailable("db down"),
        };
        let hook = RefreshError::AfterUpdate {
            loader: "b".to_string(),
            source: SourceError::rejected("summary"),
        };
        assert_eq!(fetch.loader(), "a");
        assert_eq!(hook.loader(), "b");
    }

    #[test]
    fn test_refresh_error_exposes_source() {
        use std::error::Error as _;

        let err = RefreshError::Fetch {
            loader: "a".to_string(),
            source: SourceError::unavailable("db down"),
        };
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Source unavailable: db down"));
    }

    #[test]
    fn test_config_error_display_invalid_cron() {
        let err = ConfigError::InvalidCron {
            expression: "61 * * * *".to_string(),
            reason: "minute out of range".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("61 * * * *"));
        assert!(msg.contains("minute out of range"));
    }

    #[test]
    fn test_ripple_error_from_variants() {
        let refresh = RippleError::from(RefreshError::Fetch {
            loader: "a".to_string(),
            source: SourceError::unavailable("x"),
        });
        assert!(matches!(refresh, RippleError::Refresh(_)));

        let config = RippleError::from(ConfigError::InvalidInterval {
            value: "0s".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, RippleError::Config(_)));
    }
}
