//! RIPPLE Scheduler - Triggers and background refresh tasks
//!
//! Parses interval and cron triggers, and runs [`ripple_core::RefreshCycle`]
//! implementations on them until a shutdown watch fires.

pub mod config;
pub mod constants;
pub mod task;
pub mod trigger;

pub use config::SchedulerConfig;
pub use task::{
    jitter_delay, refresh_task, spawn_cron_task, spawn_refresh_task, RefreshMetrics,
    RefreshSnapshot, StartMode,
};
pub use trigger::{parse_cron, parse_interval, Trigger};
