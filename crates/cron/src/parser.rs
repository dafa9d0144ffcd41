//! Standard five-field cron expression parsing and matching.
//!
//! Fields are minutes (0-59), hours (0-23), days of month (1-31), months
//! (1-12, names accepted), and weekdays (0-6 with 0 = Sunday, names
//! accepted). Elements are `*`, a value, `N-M`, `N-M/S`, or `*/S`, in
//! comma lists. All evaluation is in UTC.

use krill::{Error, ErrorKind, Result};
use time::OffsetDateTime;

/// A parsed cron expression: five sorted, deduplicated value sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    pub minutes: Vec<u8>,
    pub hours: Vec<u8>,
    pub days: Vec<u8>,
    pub months: Vec<u8>,
    pub weekdays: Vec<u8>,
}

const MONTH_NAMES: &[(&str, u8)] = &[
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const DAY_NAMES: &[(&str, u8)] = &[
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

/// Resolve a token to a value, consulting the name table first.
fn resolve_value(token: &str, min: u8, max: u8, names: &[(&str, u8)]) -> Result<u8> {
    if token.len() >= 3 {
        let lower = token.to_ascii_lowercase();
        if let Some((_, v)) = names.iter().find(|(name, _)| *name == lower) {
            return Ok(*v);
        }
    }

    let value: u8 = token.parse().map_err(|_| {
        Error::with_detail(ErrorKind::InvalidArgument, "Invalid cron value", token.to_string())
    })?;

    if value < min || value > max {
        return Err(Error::with_detail(
            ErrorKind::InvalidArgument,
            "Cron value out of range",
            format!("{token} (expected {min}-{max})"),
        ));
    }

    Ok(value)
}

/// Parse one element: `*`, `N`, `N-M`, `N-M/S`, `*/S`, or a name.
fn parse_element(elem: &str, min: u8, max: u8, names: &[(&str, u8)]) -> Result<Vec<u8>> {
    let (range_part, step) = match elem.split_once('/') {
        Some((range, step_str)) => {
            let step: u32 = step_str.parse().map_err(|_| {
                Error::with_detail(
                    ErrorKind::InvalidArgument,
                    "Invalid step value",
                    step_str.to_string(),
                )
            })?;
            if step == 0 {
                return Err(Error::with_detail(
                    ErrorKind::InvalidArgument,
                    "Invalid step value",
                    step_str.to_string(),
                ));
            }
            (range, step)
        }
        None => (elem, 1),
    };

    if range_part == "*" {
        return Ok((min..=max).step_by(step as usize).collect());
    }

    if let Some((start_str, end_str)) = range_part.split_once('-') {
        let start = resolve_value(start_str, min, max, names)?;
        let end = resolve_value(end_str, min, max, names)?;
        if start > end {
            return Err(Error::with_detail(
                ErrorKind::InvalidArgument,
                "Invalid range",
                format!("{start_str}-{end_str}"),
            ));
        }
        return Ok((start..=end).step_by(step as usize).collect());
    }

    let value = resolve_value(range_part, min, max, names)?;
    if step > 1 {
        // A step on a single value means "from value to max".
        Ok((value..=max).step_by(step as usize).collect())
    } else {
        Ok(vec![value])
    }
}

/// Parse a comma list of elements into a sorted, deduplicated set.
fn parse_field(field: &str, min: u8, max: u8, names: &[(&str, u8)]) -> Result<Vec<u8>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_element(part, min, max, names)?);
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

/// Parse a five-field cron expression.
pub fn parse_cron(expr: &str) -> Result<CronExpression> {
    let fields: Vec<&str> = expr.split_whitespace().collect();

    if fields.len() != 5 {
        return Err(Error::with_detail(
            ErrorKind::InvalidArgument,
            "Cron expression must have exactly 5 fields",
            format!("got {} in '{}'", fields.len(), expr),
        ));
    }

    Ok(CronExpression {
        minutes: parse_field(fields[0], 0, 59, &[])?,
        hours: parse_field(fields[1], 0, 23, &[])?,
        days: parse_field(fields[2], 1, 31, &[])?,
        months: parse_field(fields[3], 1, 12, MONTH_NAMES)?,
        weekdays: parse_field(fields[4], 0, 6, DAY_NAMES)?,
    })
}

/// Whether `expr` fires at the minute containing `t` (UTC).
pub fn matches(expr: &CronExpression, t: OffsetDateTime) -> bool {
    let t = t.to_offset(time::UtcOffset::UTC);
    let minute = t.minute();
    let hour = t.hour();
    let day = t.day();
    let month = t.month() as u8;
    let weekday = t.weekday().number_days_from_sunday();

    expr.minutes.binary_search(&minute).is_ok()
        && expr.hours.binary_search(&hour).is_ok()
        && expr.days.binary_search(&day).is_ok()
        && expr.months.binary_search(&month).is_ok()
        && expr.weekdays.binary_search(&weekday).is_ok()
}

/// Minutes searched before `next_occurrence` gives up (about four years).
const MAX_SEARCH_MINUTES: i64 = 4 * 366 * 24 * 60;

/// The next minute at or after `from + 1min` at which `expr` fires.
///
/// Linear minute-by-minute search. On horizon exhaustion the last
/// candidate is returned with a warning; callers should treat a result
/// that far out as "never".
pub fn next_occurrence(expr: &CronExpression, from: OffsetDateTime) -> OffsetDateTime {
    // Truncate to the start of the minute, then advance one minute.
    let minute_ts = from.unix_timestamp().div_euclid(60) * 60;
    let mut candidate_ts = minute_ts + 60;

    for _ in 0..MAX_SEARCH_MINUTES {
        let candidate = OffsetDateTime::from_unix_timestamp(candidate_ts)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        if matches(expr, candidate) {
            return candidate;
        }
        candidate_ts += 60;
    }

    log::warn!("next_occurrence exceeded search horizon for cron expression");
    OffsetDateTime::from_unix_timestamp(candidate_ts).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
