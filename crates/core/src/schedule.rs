//! 5-field cron trigger expressions.
//!
//! Scripts are scheduled with the classic 5-field cron syntax (minute, hour,
//! day-of-month, month, day-of-week). The `cron` crate expects a leading
//! seconds field, so [`Schedule::parse`] validates the field count first and
//! then prepends a fixed `0` seconds column before handing the expression
//! over.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use thiserror::Error;

/// Number of fields in a trigger expression.
const FIELD_COUNT: usize = 5;

/// Error produced when a trigger expression cannot be parsed.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("expected {FIELD_COUNT} fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron expression: {0}")]
    Parse(String),
}

/// A validated 5-field recurring trigger expression.
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    inner: CronSchedule,
}

impl Schedule {
    /// Parse and validate a 5-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        // The cron crate works on 6/7-field expressions with seconds first.
        let with_seconds = format!("0 {}", fields.join(" "));
        let inner = CronSchedule::from_str(&with_seconds)
            .map_err(|e| ScheduleError::Parse(e.to_string()))?;

        Ok(Self {
            expression: fields.join(" "),
            inner,
        })
    }

    /// The normalized 5-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next qualifying timestamp strictly after `now`, if any.
    ///
    /// Returns `None` only for expressions that can never fire again
    /// (e.g. a fully specified date in the past).
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&now).next()
    }

    /// Human-readable description of the trigger, field by field.
    pub fn describe(&self) -> String {
        let fields: Vec<&str> = self.expression.split_whitespace().collect();
        format!(
            "cron[minute='{}' hour='{}' day='{}' month='{}' day_of_week='{}']",
            fields[0], fields[1], fields[2], fields[3], fields[4]
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Timelike;

    #[test]
    fn accepts_every_five_minutes() {
        let schedule = Schedule::parse("*/5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "*/5 * * * *");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_matches!(Schedule::parse("* * * *"), Err(ScheduleError::FieldCount(4)));
        assert_matches!(
            Schedule::parse("0 * * * * *"),
            Err(ScheduleError::FieldCount(6))
        );
    }

    #[test]
    fn rejects_garbage_fields() {
        assert_matches!(
            Schedule::parse("potato * * * *"),
            Err(ScheduleError::Parse(_))
        );
    }

    #[test]
    fn rejects_empty_expression() {
        assert_matches!(Schedule::parse(""), Err(ScheduleError::FieldCount(0)));
    }

    #[test]
    fn normalizes_whitespace() {
        let schedule = Schedule::parse("  0   *  * * *  ").unwrap();
        assert_eq!(schedule.expression(), "0 * * * *");
    }

    #[test]
    fn next_run_is_a_five_minute_boundary_strictly_after_now() {
        let schedule = Schedule::parse("*/5 * * * *").unwrap();
        let now = Utc::now();
        let next = schedule.next_after(now).expect("always has a next fire");

        assert!(next > now);
        assert_eq!(next.minute() % 5, 0);
        assert_eq!(next.second(), 0);
        // Never more than 5 minutes out.
        assert!((next - now).num_seconds() <= 300);
    }

    #[test]
    fn hourly_fires_at_minute_zero() {
        let schedule = Schedule::parse("0 * * * *").unwrap();
        let next = schedule.next_after(Utc::now()).unwrap();
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn describe_lists_all_fields() {
        let schedule = Schedule::parse("*/5 2 * * 1").unwrap();
        assert_eq!(
            schedule.describe(),
            "cron[minute='*/5' hour='2' day='*' month='*' day_of_week='1']"
        );
    }
}
