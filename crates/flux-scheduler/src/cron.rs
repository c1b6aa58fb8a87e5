use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{Result, SchedulerError};

/// One field of a parsed cron expression: the set of values it matches.
#[derive(Debug, Clone)]
struct Field {
    values: Vec<u32>,
}

impl Field {
    fn matches(&self, v: u32) -> bool {
        self.values.contains(&v)
    }
}

/// A standard 5-field cron expression: `minute hour day-of-month month day-of-week`.
///
/// Supports `*`, comma lists, ranges (`a-b`), and steps (`*/n`, `a-b/n`) in
/// every field — a strict superset of plain numeric values, no weekday-name
/// or macro (`@daily`) support.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
    source: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCron {
                expr: expr.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let minute = parse_field(fields[0], 0, 59, expr)?;
        let hour = parse_field(fields[1], 0, 23, expr)?;
        let day_of_month = parse_field(fields[2], 1, 31, expr)?;
        let month = parse_field(fields[3], 1, 12, expr)?;
        let day_of_week = parse_field(fields[4], 0, 6, expr)?;

        Ok(Self { minute, hour, day_of_month, month, day_of_week, source: expr.to_string() })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self.day_of_week.matches(dt.weekday().num_days_from_sunday())
    }

    /// Finds the next minute-aligned instant strictly after `from` that
    /// matches this expression. Searches up to four years ahead before
    /// giving up (guards against a field set that never matches, e.g.
    /// `31 2 *` on a month without a 31st combined with an impossible hour).
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (from + Duration::minutes(1))
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))?;
        let limit = from + Duration::days(366 * 4);

        while candidate < limit {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(raw: &str, min: u32, max: u32, whole_expr: &str) -> Result<Field> {
    let mut values = Vec::new();
    for part in raw.split(',') {
        values.extend(parse_part(part, min, max, whole_expr)?);
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(SchedulerError::InvalidCron {
            expr: whole_expr.to_string(),
            reason: format!("field {raw:?} matches no values"),
        });
    }
    Ok(Field { values })
}

fn parse_part(part: &str, min: u32, max: u32, whole_expr: &str) -> Result<Vec<u32>> {
    let invalid = |reason: String| SchedulerError::InvalidCron { expr: whole_expr.to_string(), reason };

    let (range_part, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step.parse().map_err(|_| invalid(format!("bad step in {part:?}")))?;
            if step == 0 {
                return Err(invalid(format!("step cannot be zero in {part:?}")));
            }
            (range, step)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let a: u32 = a.parse().map_err(|_| invalid(format!("bad range start in {part:?}")))?;
        let b: u32 = b.parse().map_err(|_| invalid(format!("bad range end in {part:?}")))?;
        (a, b)
    } else {
        let v: u32 = range_part.parse().map_err(|_| invalid(format!("bad value {part:?}")))?;
        (v, v)
    };

    if lo < min || hi > max || lo > hi {
        return Err(invalid(format!("value {part:?} out of range [{min},{max}]")));
    }

    Ok((lo..=hi).step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wildcard_matches_every_minute() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap();
        let next = cron.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 31, 0).unwrap());
    }

    #[test]
    fn daily_at_specific_time() {
        let cron = CronSchedule::parse("30 9 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let next = cron.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn step_and_range_fields() {
        let cron = CronSchedule::parse("*/15 8-10 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 8, 1, 0).unwrap();
        let next = cron.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 8, 15, 0).unwrap());
    }

    #[test]
    fn weekday_field_restricts_to_matching_days() {
        // 2026-01-01 is a Thursday (weekday 4).
        let cron = CronSchedule::parse("0 0 * * 1").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = cron.next_after(from).unwrap();
        assert_eq!(next.weekday().num_days_from_sunday(), 1);
        assert!(next > from);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
    }
}
