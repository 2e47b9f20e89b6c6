//! Constants for RIPPLE scheduling
//!
//! Defaults and environment variable names used by the scheduler.

// ============================================================================
// WATERMARK RESET
// ============================================================================

/// Upper bound of the random delay before a cron-triggered watermark reset
/// (seconds). Spreads full resyncs of many instances over a minute.
pub const DEFAULT_RESET_JITTER_SECS: u64 = 60;

/// Reset jitter used by the development profile (seconds).
pub const DEVELOPMENT_RESET_JITTER_SECS: u64 = 0;

// ============================================================================
// TRIGGERS
// ============================================================================

/// Prefix that marks an interval in cron-style trigger strings.
pub const EVERY_PREFIX: &str = "@every ";

/// Number of fields in a classic cron expression (no seconds field).
pub const CLASSIC_CRON_FIELDS: usize = 5;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Overrides the reset jitter (seconds).
pub const ENV_RESET_JITTER_SECS: &str = "RIPPLE_RESET_JITTER_SECS";

/// Set to `false` to log failed scheduled cycles at debug instead of error.
pub const ENV_LOG_FAILURES: &str = "RIPPLE_LOG_FAILURES";
