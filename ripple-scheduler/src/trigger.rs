//! Refresh triggers: fixed intervals and cron expressions.
//!
//! Trigger strings are validated when they are parsed, so a malformed
//! schedule is reported at registration time and nothing gets scheduled.
//!
//! Accepted forms:
//!
//! ```text
//! 30s | 5m | 1h30m | 250ms      interval
//! @every 5m                     interval
//! @hourly | @daily | ...        cron shorthand
//! */5 * * * *                   classic 5-field cron (fires at second 0)
//! 0 */5 * * * *                 6/7-field cron with seconds (and year)
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use cron::Schedule;
use ripple_core::{ConfigError, Timestamp};

use crate::constants::{CLASSIC_CRON_FIELDS, EVERY_PREFIX};

/// When a refresh cycle fires.
#[derive(Clone)]
pub enum Trigger {
    /// Fire every `Duration`.
    Interval(Duration),
    /// Fire on each upcoming time of the schedule.
    Cron(Box<Schedule>),
}

impl Trigger {
    /// Fixed-period trigger. Zero periods are rejected.
    pub fn every(period: Duration) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::InvalidInterval {
                value: format!("{period:?}"),
                reason: "interval must be positive".to_string(),
            });
        }
        Ok(Self::Interval(period))
    }

    /// Cron trigger from an expression or shorthand.
    pub fn cron(expression: &str) -> Result<Self, ConfigError> {
        parse_cron(expression).map(|schedule| Self::Cron(Box::new(schedule)))
    }

    /// Parse any accepted trigger string.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let expr = expr.trim();
        if let Some(interval) = expr.strip_prefix(EVERY_PREFIX) {
            return parse_interval(interval).map(Self::Interval);
        }
        if expr.starts_with('@') || expr.contains(char::is_whitespace) {
            return Self::cron(expr);
        }
        parse_interval(expr).map(Self::Interval)
    }

    /// The period of an interval trigger.
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Interval(period) => Some(*period),
            Self::Cron(_) => None,
        }
    }

    /// First firing strictly after `after`.
    pub fn next_fire_after(&self, after: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Interval(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|step| after.checked_add_signed(step)),
            Self::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

impl FromStr for Trigger {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Trigger {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Interval(a), Self::Interval(b)) => a == b,
            (Self::Cron(a), Self::Cron(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(period) => f.debug_tuple("Interval").field(period).finish(),
            Self::Cron(schedule) => f.debug_tuple("Cron").field(&schedule.to_string()).finish(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(period) => write!(f, "{EVERY_PREFIX}{period:?}"),
            Self::Cron(schedule) => write!(f, "{schedule}"),
        }
    }
}

/// Parse an interval such as `30s`, `5m`, `1h30m` or `250ms`.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidInterval {
        value: value.to_string(),
        reason,
    };

    let mut rest = value.trim();
    if rest.is_empty() {
        return Err(invalid("empty interval".to_string()));
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid(format!("expected a number at {rest:?}")));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("number out of range".to_string()))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let step = match unit {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(3600).map(Duration::from_secs),
            "" => return Err(invalid(format!("missing unit after {amount}"))),
            other => return Err(invalid(format!("unknown unit {other:?}"))),
        };
        total = step
            .and_then(|step| total.checked_add(step))
            .ok_or_else(|| invalid("interval overflows".to_string()))?;
    }

    if total.is_zero() {
        return Err(invalid("interval must be positive".to_string()));
    }
    Ok(total)
}

/// Parse a cron expression. Classic 5-field expressions fire at second 0.
pub fn parse_cron(expression: &str) -> Result<Schedule, ConfigError> {
    let expression = expression.trim();
    let normalized = if !expression.starts_with('@')
        && expression.split_whitespace().count() == CLASSIC_CRON_FIELDS
    {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}
