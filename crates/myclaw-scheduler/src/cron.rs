//! Narrow cron-matching boundary (§4.8, §9 "no cron-expression engine
//! beyond what spec requires"). `CronSchedule::matches` is the whole
//! contract; `MinuteCron` is the one concrete implementation, deliberately
//! matching at minute granularity (it fires once per matching minute,
//! ignoring the seconds field beyond requiring `second == 0`) so a future
//! full croner-equivalent can be swapped in behind the same trait without
//! touching the engine.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::{Result, SchedulerError};

pub trait CronSchedule: Send + Sync {
    fn matches(&self, at: DateTime<Utc>) -> bool;
}

/// 6 whitespace-separated fields: `sec min hour day-of-month month
/// day-of-week`. Each field accepts `*`, `*/step`, `a-b`, `a,b,c`, or a bare
/// number. `day-of-week` is 0 = Sunday .. 6 = Saturday.
pub struct MinuteCron {
    minute: String,
    hour: String,
    day_of_month: String,
    month: String,
    day_of_week: String,
}

impl MinuteCron {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "expected 6 fields (sec min hour dom month dow), got {}: {expression}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: fields[1].to_string(),
            hour: fields[2].to_string(),
            day_of_month: fields[3].to_string(),
            month: fields[4].to_string(),
            day_of_week: fields[5].to_string(),
        })
    }
}

impl CronSchedule for MinuteCron {
    fn matches(&self, at: DateTime<Utc>) -> bool {
        at.second() == 0
            && field_matches(&self.minute, at.minute())
            && field_matches(&self.hour, at.hour())
            && field_matches(&self.day_of_month, at.day())
            && field_matches(&self.month, at.month())
            && field_matches(&self.day_of_week, at.weekday().num_days_from_sunday())
    }
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    field.split(',').any(|part| part_matches(part, value))
}

fn part_matches(part: &str, value: u32) -> bool {
    if let Some(step) = part.strip_prefix("*/") {
        return step.parse::<u32>().map(|s| s > 0 && value % s == 0).unwrap_or(false);
    }
    if let Some((lo, hi)) = part.split_once('-') {
        if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
            return value >= lo && value <= hi;
        }
        return false;
    }
    part.parse::<u32>().map(|n| n == value).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_wrong_field_count() {
        assert!(MinuteCron::parse("* * *").is_err());
    }

    #[test]
    fn wildcard_matches_every_minute_boundary() {
        let cron = MinuteCron::parse("0 * * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 7, 29, 14, 30, 0).unwrap();
        assert!(cron.matches(at));
        let not_boundary = Utc.with_ymd_and_hms(2026, 7, 29, 14, 30, 15).unwrap();
        assert!(!cron.matches(not_boundary));
    }

    #[test]
    fn step_field_matches_every_n_minutes() {
        let cron = MinuteCron::parse("0 */15 * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 7, 29, 14, 30, 0).unwrap();
        assert!(cron.matches(at));
        let off = Utc.with_ymd_and_hms(2026, 7, 29, 14, 31, 0).unwrap();
        assert!(!cron.matches(off));
    }

    #[test]
    fn range_and_list_fields_match() {
        let cron = MinuteCron::parse("0 0 9-17 * * 1,3,5").unwrap();
        let wed = Utc.with_ymd_and_hms(2026, 7, 29, 10, 0, 0).unwrap();
        assert!(cron.matches(wed));
        let tue = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        assert!(!cron.matches(tue));
    }
}
