use super::ScheduleError;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

const MINUTE_MS: i64 = 60_000;
/// Upper bound on the search so an expression like `0 0 30 2 *` terminates.
const MAX_SEARCH_MINUTES: i64 = 60 * 24 * 366 * 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Names {
    None,
    Month,
    Weekday,
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    label: &'static str,
    min: u32,
    max: u32,
    names: Names,
}

const MINUTE: FieldSpec = FieldSpec {
    label: "minute",
    min: 0,
    max: 59,
    names: Names::None,
};
const HOUR: FieldSpec = FieldSpec {
    label: "hour",
    min: 0,
    max: 23,
    names: Names::None,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    label: "day of month",
    min: 1,
    max: 31,
    names: Names::None,
};
const MONTH: FieldSpec = FieldSpec {
    label: "month",
    min: 1,
    max: 12,
    names: Names::Month,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    label: "day of week",
    min: 0,
    max: 7,
    names: Names::Weekday,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    wildcard: bool,
    values: BTreeSet<u32>,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        self.wildcard || self.values.contains(&value)
    }
}

/// Standard five-field cron expression, evaluated in a caller-supplied zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let expanded = match raw.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                raw,
                "expected 5 fields: minute hour day_of_month month day_of_week",
            ));
        }
        Ok(Self {
            minute: parse_field(fields[0], MINUTE, raw)?,
            hour: parse_field(fields[1], HOUR, raw)?,
            day_of_month: parse_field(fields[2], DAY_OF_MONTH, raw)?,
            month: parse_field(fields[3], MONTH, raw)?,
            day_of_week: parse_field(fields[4], DAY_OF_WEEK, raw)?,
        })
    }

    /// Classic cron rule: when both day fields are restricted, either may match.
    fn day_matches(&self, day: u32, weekday: u32) -> bool {
        let dom = self.day_of_month.matches(day);
        let dow = self.day_of_week.matches(weekday);
        if self.day_of_month.wildcard || self.day_of_week.wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// First matching minute strictly after `after_ms`.
    pub fn next_after(&self, after_ms: i64, tz: &Tz) -> Option<i64> {
        let mut candidate = (after_ms.div_euclid(MINUTE_MS) + 1) * MINUTE_MS;
        let deadline = candidate.saturating_add(MAX_SEARCH_MINUTES * MINUTE_MS);
        while candidate <= deadline {
            let local = Utc.timestamp_millis_opt(candidate).single()?.with_timezone(tz);
            let day_ok = self.month.matches(local.month())
                && self.day_matches(local.day(), local.weekday().num_days_from_sunday());
            if !day_ok || !self.hour.matches(local.hour()) {
                // Nothing can match before the next local hour.
                candidate += i64::from(60 - local.minute()) * MINUTE_MS;
                continue;
            }
            if self.minute.matches(local.minute()) {
                return Some(candidate);
            }
            candidate += MINUTE_MS;
        }
        None
    }
}

fn invalid(raw: &str, reason: &str) -> ScheduleError {
    ScheduleError::InvalidCron {
        expression: raw.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_field(raw: &str, spec: FieldSpec, expr: &str) -> Result<Field, ScheduleError> {
    if raw == "*" {
        return Ok(Field {
            wildcard: true,
            values: BTreeSet::new(),
        });
    }
    let mut values = BTreeSet::new();
    for part in raw.split(',') {
        parse_part(part, spec, expr, &mut values)?;
    }
    if values.is_empty() {
        return Err(invalid(expr, &format!("empty {} field", spec.label)));
    }
    Ok(Field {
        wildcard: false,
        values,
    })
}

fn parse_part(
    part: &str,
    spec: FieldSpec,
    expr: &str,
    values: &mut BTreeSet<u32>,
) -> Result<(), ScheduleError> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step = step
                .parse::<u32>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| invalid(expr, &format!("invalid step `{step}`")))?;
            (range, step)
        }
        None => (part, 1),
    };

    let (start, end) = if range == "*" {
        (spec.min, spec.max)
    } else if let Some((lo, hi)) = range.split_once('-') {
        (parse_value(lo, spec, expr)?, parse_value(hi, spec, expr)?)
    } else {
        let value = parse_value(range, spec, expr)?;
        // `5/15` means "from 5 to the end in steps of 15".
        if part.contains('/') {
            (value, spec.max)
        } else {
            (value, value)
        }
    };
    if start > end {
        return Err(invalid(expr, &format!("descending range `{range}`")));
    }

    for value in (start..=end).step_by(step as usize) {
        // Sunday may be written as 0 or 7.
        let normalized = if spec.names == Names::Weekday && value == 7 {
            0
        } else {
            value
        };
        values.insert(normalized);
    }
    Ok(())
}

fn parse_value(raw: &str, spec: FieldSpec, expr: &str) -> Result<u32, ScheduleError> {
    let lower = raw.to_ascii_lowercase();
    let named = match spec.names {
        Names::None => None,
        Names::Month => [
            "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
        ]
        .iter()
        .position(|name| *name == lower)
        .map(|idx| idx as u32 + 1),
        Names::Weekday => ["sun", "mon", "tue", "wed", "thu", "fri", "sat"]
            .iter()
            .position(|name| *name == lower)
            .map(|idx| idx as u32),
    };
    let value = match named {
        Some(value) => value,
        None => lower
            .parse::<u32>()
            .map_err(|_| invalid(expr, &format!("invalid {} value `{raw}`", spec.label)))?,
    };
    if value < spec.min || value > spec.max {
        return Err(invalid(
            expr,
            &format!(
                "{} value `{raw}` is out of range {}..={}",
                spec.label, spec.min, spec.max
            ),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
            .expect("valid date")
    }

    #[test]
    fn every_fifteen_minutes() {
        let cron = CronSchedule::parse("*/15 * * * *").expect("parse");
        let start = utc_ms(2026, 3, 1, 10, 7);
        assert_eq!(cron.next_after(start, &Tz::UTC), Some(utc_ms(2026, 3, 1, 10, 15)));
    }

    #[test]
    fn exact_match_is_not_returned_again() {
        let cron = CronSchedule::parse("0 9 * * *").expect("parse");
        let nine = utc_ms(2026, 3, 1, 9, 0);
        assert_eq!(cron.next_after(nine, &Tz::UTC), Some(utc_ms(2026, 3, 2, 9, 0)));
    }

    #[test]
    fn evaluates_in_configured_timezone() {
        let cron = CronSchedule::parse("0 9 * * mon-fri").expect("parse");
        let tz: Tz = "America/New_York".parse().expect("tz");
        // Saturday 2026-03-07 12:00 UTC -> next is Monday 09:00 EDT (13:00 UTC).
        let start = utc_ms(2026, 3, 7, 12, 0);
        assert_eq!(cron.next_after(start, &tz), Some(utc_ms(2026, 3, 9, 13, 0)));
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // 1st of the month OR any Friday.
        let cron = CronSchedule::parse("0 0 1 * fri").expect("parse");
        let start = utc_ms(2026, 1, 1, 1, 0); // Thursday
        assert_eq!(cron.next_after(start, &Tz::UTC), Some(utc_ms(2026, 1, 2, 0, 0)));
    }

    #[test]
    fn macros_and_names_are_supported() {
        assert_eq!(
            CronSchedule::parse("@daily").expect("daily"),
            CronSchedule::parse("0 0 * * *").expect("plain")
        );
        assert_eq!(
            CronSchedule::parse("0 0 1 jan,JUL *").expect("names"),
            CronSchedule::parse("0 0 1 1,7 *").expect("numbers")
        );
        assert_eq!(
            CronSchedule::parse("0 0 * * 7").expect("seven"),
            CronSchedule::parse("0 0 * * 0").expect("zero")
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "* * * *", "60 * * * *", "* * * * * *", "*/0 * * * *", "5-1 * * * *", "0 0 * foo *"] {
            assert!(CronSchedule::parse(bad).is_err(), "`{bad}` should be rejected");
        }
    }

    #[test]
    fn impossible_date_yields_none() {
        let cron = CronSchedule::parse("0 0 30 2 *").expect("parse");
        assert_eq!(cron.next_after(utc_ms(2026, 1, 1, 0, 0), &Tz::UTC), None);
    }

    #[test]
    fn repeated_computation_strictly_advances() {
        let tz: Tz = "Europe/London".parse().expect("tz");
        for expr in ["*/7 * * * *", "30 1 * * *", "0 */5 * * 1-5", "15 14 1 * *", "@hourly"] {
            let cron = CronSchedule::parse(expr).expect("parse");
            let mut last = utc_ms(2026, 3, 28, 23, 58); // spans the BST switch
            for _ in 0..50 {
                let next = cron.next_after(last, &tz).expect("next");
                assert!(next > last, "{expr}: {next} <= {last}");
                last = next;
            }
        }
    }
}
