//! The refresh-cycle contract shared by loaders and the scheduler.

use async_trait::async_trait;

use crate::RippleResult;

/// Outcome of one successful refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records returned by the fetch step.
    pub fetched: usize,
    /// Records written to the cache.
    pub applied: usize,
    /// Records skipped (version mode only; watermark mode never skips).
    pub skipped: usize,
}

impl CycleReport {
    /// A cycle whose fetch returned nothing.
    pub fn is_noop(&self) -> bool {
        self.fetched == 0
    }
}

/// Something that can run one refresh cycle on demand.
///
/// Callers that schedule cycles must not invoke `run_cycle` concurrently for
/// the same instance.
#[async_trait]
pub trait RefreshCycle: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Run one fetch → process → advance cycle.
    async fn run_cycle(&self) -> RippleResult<CycleReport>;
}
