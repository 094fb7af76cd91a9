use super::{CronSchedule, ScheduleError, ScheduleKind};
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

/// A schedule as stored: the kind plus its raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec<'a> {
    pub kind: ScheduleKind,
    pub value: &'a str,
}

enum Parsed {
    Cron(CronSchedule),
    Interval(i64),
    Once(i64),
}

fn parse(spec: ScheduleSpec<'_>, tz: &Tz) -> Result<Parsed, ScheduleError> {
    match spec.kind {
        ScheduleKind::Cron => CronSchedule::parse(spec.value).map(Parsed::Cron),
        ScheduleKind::Interval => parse_interval(spec.value).map(Parsed::Interval),
        ScheduleKind::Once => parse_once(spec.value, tz).map(Parsed::Once),
    }
}

fn parse_interval(raw: &str) -> Result<i64, ScheduleError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| ScheduleError::InvalidInterval(raw.to_string()))
}

/// RFC 3339, or a naive local date-time interpreted in `tz`.
fn parse_once(raw: &str, tz: &Tz) -> Result<i64, ScheduleError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map_err(|_| ScheduleError::InvalidTimestamp(raw.to_string()))?;
    // Local times inside a DST gap do not exist.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.timestamp_millis())
        .ok_or_else(|| ScheduleError::InvalidTimestamp(raw.to_string()))
}

fn next_cron(cron: &CronSchedule, after: i64, tz: &Tz, raw: &str) -> Result<i64, ScheduleError> {
    cron.next_after(after, tz)
        .ok_or_else(|| ScheduleError::NoOccurrence(raw.to_string()))
}

/// Smallest `anchor + k * interval` (k >= 1) strictly after `now`.
fn advance_interval(anchor: i64, interval: i64, now: i64) -> i64 {
    let elapsed = now.saturating_sub(anchor).max(0);
    let steps = elapsed / interval + 1;
    anchor.saturating_add(steps.saturating_mul(interval))
}

/// Validates a new schedule and returns its first `next_run`.
pub fn first_run(spec: ScheduleSpec<'_>, now: i64, tz: &Tz) -> Result<i64, ScheduleError> {
    match parse(spec, tz)? {
        Parsed::Cron(cron) => next_cron(&cron, now, tz, spec.value),
        Parsed::Interval(interval) => Ok(now.saturating_add(interval)),
        Parsed::Once(at) if at > now => Ok(at),
        Parsed::Once(_) => Err(ScheduleError::NotInFuture(spec.value.to_string())),
    }
}

/// Next occurrence after a firing whose scheduled time was `previous`.
/// `None` means the task is finished.
pub fn next_run_after_firing(
    spec: ScheduleSpec<'_>,
    previous: i64,
    now: i64,
    tz: &Tz,
) -> Result<Option<i64>, ScheduleError> {
    match spec.kind {
        ScheduleKind::Once => Ok(None),
        ScheduleKind::Cron => {
            let cron = CronSchedule::parse(spec.value)?;
            // From the later of the two so a long outage yields one catch-up run.
            next_cron(&cron, previous.max(now), tz, spec.value).map(Some)
        }
        ScheduleKind::Interval => {
            let interval = parse_interval(spec.value)?;
            Ok(Some(advance_interval(previous, interval, now)))
        }
    }
}

/// `next_run` for a task coming back from `paused`. A stored time still in the
/// future is kept; otherwise recurring kinds move to their next slot after
/// `now` and an overdue `once` task becomes due immediately.
pub fn resume_run(
    spec: ScheduleSpec<'_>,
    stored: Option<i64>,
    now: i64,
    tz: &Tz,
) -> Result<i64, ScheduleError> {
    if let Some(at) = stored.filter(|at| *at > now) {
        return Ok(at);
    }
    match parse(spec, tz)? {
        Parsed::Cron(cron) => next_cron(&cron, now, tz, spec.value),
        Parsed::Interval(interval) => Ok(match stored {
            Some(anchor) => advance_interval(anchor, interval, now),
            None => now.saturating_add(interval),
        }),
        Parsed::Once(at) => Ok(stored.unwrap_or(at).min(now)),
    }
}
