//! Cron schedules for time-based alerts.
//!
//! Expressions use the `cron` crate's dialect:
//!
//! ```text
//! [second] minute hour day-of-month month day-of-week [year]
//! ```
//!
//! A five-field expression fires at second 0. Weekdays are numbered 1-7
//! from Sunday, or named `SUN`-`SAT`. When both day fields are restricted
//! a day must match both.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid cron expression '{expression}': {source}")]
pub struct CronError {
    pub expression: String,
    pub source: cron::error::Error,
}

#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let with_seconds = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        Schedule::from_str(&with_seconds)
            .map(|schedule| Self { schedule })
            .map_err(|source| CronError {
                expression: expr.to_string(),
                source,
            })
    }
}

impl CronSchedule {
    /// First fire instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether the schedule fires in the half-open window `(from, to]`.
    pub fn fires_within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.next_after(from).is_some_and(|t| t <= to)
    }
}
