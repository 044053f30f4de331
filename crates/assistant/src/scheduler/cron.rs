//! Trigger evaluation: 5-field cron expressions, field-based recurring
//! schedules, and one-shot run-at timestamps, all evaluated in the
//! scheduler's configured timezone.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};

use valet_domain::error::{Error, Result};

use super::model::{CronFields, DowValue, ScheduleSpec};

/// Parse an IANA timezone name, falling back to UTC.
pub fn parse_tz(name: &str) -> chrono_tz::Tz {
    match name.parse::<chrono_tz::Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(timezone = name, "unknown timezone, falling back to UTC");
            chrono_tz::UTC
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One cron field: `*`, `*/N`, or a comma list of values and ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldPat {
    Any,
    Step(u32),
    /// Inclusive ranges; a single value is `(n, n)`.
    Values(Vec<(u32, u32)>),
}

impl FieldPat {
    fn parse(field: &str) -> Result<Self> {
        if field == "*" {
            return Ok(Self::Any);
        }
        if let Some(step) = field.strip_prefix("*/") {
            let n: u32 = step
                .parse()
                .map_err(|_| Error::Schedule(format!("bad cron step: {field:?}")))?;
            if n == 0 {
                return Err(Error::Schedule("cron step must be positive".into()));
            }
            return Ok(Self::Step(n));
        }

        let mut ranges = Vec::new();
        for part in field.split(',') {
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| Error::Schedule(format!("bad cron range: {part:?}")))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| Error::Schedule(format!("bad cron range: {part:?}")))?;
                if lo > hi {
                    return Err(Error::Schedule(format!("inverted cron range: {part:?}")));
                }
                ranges.push((lo, hi));
            } else {
                let n: u32 = part
                    .parse()
                    .map_err(|_| Error::Schedule(format!("bad cron value: {part:?}")))?;
                ranges.push((n, n));
            }
        }
        Ok(Self::Values(ranges))
    }

    fn single(value: u32) -> Self {
        Self::Values(vec![(value, value)])
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Step(n) => value % n == 0,
            Self::Values(ranges) => ranges.iter().any(|(lo, hi)| value >= *lo && value <= *hi),
        }
    }

    /// The sole value this field accepts, if it is that narrow.
    fn as_single(&self) -> Option<u32> {
        match self {
            Self::Values(ranges) if ranges.len() == 1 && ranges[0].0 == ranges[0].1 => {
                Some(ranges[0].0)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldPat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Step(n) => write!(f, "*/{n}"),
            Self::Values(ranges) => {
                let parts: Vec<String> = ranges
                    .iter()
                    .map(|(lo, hi)| {
                        if lo == hi {
                            lo.to_string()
                        } else {
                            format!("{lo}-{hi}")
                        }
                    })
                    .collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CronSpec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed recurring trigger: minute, hour, day-of-month, month,
/// day-of-week (0 = Sunday).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minute: FieldPat,
    hour: FieldPat,
    day: FieldPat,
    month: FieldPat,
    weekday: FieldPat,
}

impl CronSpec {
    /// Parse a 5-field crontab expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::Schedule(format!(
                "cron expression needs 5 fields, got {}: {expr:?}",
                fields.len()
            )));
        }
        Ok(Self {
            minute: FieldPat::parse(fields[0])?,
            hour: FieldPat::parse(fields[1])?,
            day: FieldPat::parse(fields[2])?,
            month: FieldPat::parse(fields[3])?,
            weekday: FieldPat::parse(fields[4])?,
        })
    }

    /// Compose a spec from individual schedule fields. Unspecified
    /// fields wildcard, except the minute which pins to 0 whenever a
    /// coarser field is given ({"hour": 9} means 09:00, not every
    /// minute of hour nine).
    pub fn from_fields(fields: &CronFields) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::Schedule("no cron fields given".into()));
        }
        let minute = match fields.minute {
            Some(m) => FieldPat::single(m),
            None => FieldPat::single(0),
        };
        let weekday = match &fields.day_of_week {
            Some(dow) => FieldPat::single(parse_weekday(dow)?),
            None => FieldPat::Any,
        };
        Ok(Self {
            minute,
            hour: fields.hour.map(FieldPat::single).unwrap_or(FieldPat::Any),
            day: fields.day.map(FieldPat::single).unwrap_or(FieldPat::Any),
            month: fields.month.map(FieldPat::single).unwrap_or(FieldPat::Any),
            weekday,
        })
    }

    fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day.matches(dt.day())
            && self.month.matches(dt.month())
            && self.weekday.matches(dt.weekday().num_days_from_sunday())
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`.
    ///
    /// DST handling: local minutes that do not exist (spring-forward
    /// gap) are skipped; ambiguous minutes (fall-back overlap) take the
    /// earliest mapping.
    pub fn next_after(&self, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let into_next_minute = 60 - i64::from(local.second());
        let mut candidate = local + chrono::Duration::seconds(into_next_minute);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        // One year of minutes bounds the scan.
        let max_checks = 366 * 24 * 60;
        for _ in 0..max_checks {
            if self.matches(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    chrono::LocalResult::None => {} // DST gap
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }

    /// Short human-readable description for confirmation prompts.
    pub fn describe(&self) -> String {
        let wildcard_date =
            self.day == FieldPat::Any && self.month == FieldPat::Any && self.weekday == FieldPat::Any;

        match (&self.minute, &self.hour) {
            (FieldPat::Any, FieldPat::Any) if wildcard_date => "every minute".into(),
            (FieldPat::Step(n), FieldPat::Any) if wildcard_date => format!("every {n} minutes"),
            (m, FieldPat::Any) if wildcard_date => {
                if let Some(minute) = m.as_single() {
                    format!("hourly at :{minute:02}")
                } else {
                    self.raw()
                }
            }
            (m, h) => match (m.as_single(), h.as_single()) {
                (Some(minute), Some(hour)) => {
                    let time = format!("{hour:02}:{minute:02}");
                    if wildcard_date {
                        format!("daily at {time}")
                    } else if let Some(dow) = self.weekday.as_single() {
                        format!("every {} at {time}", weekday_name(dow))
                    } else if let Some(day) = self.day.as_single() {
                        format!("monthly on day {day} at {time}")
                    } else {
                        self.raw()
                    }
                }
                _ => self.raw(),
            },
        }
    }

    fn raw(&self) -> String {
        format!(
            "cron \"{} {} {} {} {}\"",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}

fn parse_weekday(dow: &DowValue) -> Result<u32> {
    let from_name = |name: &str| match name.to_ascii_lowercase().as_str() {
        "sun" | "sunday" => Some(0),
        "mon" | "monday" => Some(1),
        "tue" | "tuesday" => Some(2),
        "wed" | "wednesday" => Some(3),
        "thu" | "thursday" => Some(4),
        "fri" | "friday" => Some(5),
        "sat" | "saturday" => Some(6),
        _ => None,
    };
    match dow {
        DowValue::Num(n) if *n <= 7 => Ok(*n % 7),
        DowValue::Num(n) => Err(Error::Schedule(format!("bad day_of_week: {n}"))),
        DowValue::Name(name) => from_name(name)
            .or_else(|| name.parse::<u32>().ok().filter(|n| *n <= 7).map(|n| n % 7))
            .ok_or_else(|| Error::Schedule(format!("bad day_of_week: {name:?}"))),
    }
}

fn weekday_name(dow: u32) -> &'static str {
    match dow {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        _ => "Saturday",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One-shot timestamps & schedule-spec triggers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a one-shot `run_at` timestamp. Naive timestamps are taken in
/// the scheduler timezone.
pub fn parse_run_at(value: &str, tz: chrono_tz::Tz) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return match tz.from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
                chrono::LocalResult::None => Err(Error::Schedule(format!(
                    "run_at falls in a DST gap: {value:?}"
                ))),
            };
        }
    }
    Err(Error::Schedule(format!("unparseable run_at: {value:?}")))
}

impl ScheduleSpec {
    /// The next fire time strictly after `after`, or `None` for a
    /// one-shot whose moment has passed.
    pub fn next_occurrence(
        &self,
        after: &DateTime<Utc>,
        tz: chrono_tz::Tz,
    ) -> Result<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::RunAt { run_at } => {
                let at = parse_run_at(run_at, tz)?;
                Ok((at > *after).then_some(at))
            }
            ScheduleSpec::Cron { cron } => Ok(CronSpec::parse(cron)?.next_after(after, tz)),
            ScheduleSpec::Fields(fields) => {
                Ok(CronSpec::from_fields(fields)?.next_after(after, tz))
            }
        }
    }

    /// Human description of the trigger, for prompts and summaries.
    pub fn describe(&self, tz: chrono_tz::Tz) -> String {
        match self {
            ScheduleSpec::RunAt { run_at } => match parse_run_at(run_at, tz) {
                Ok(at) => format!("once at {}", at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")),
                Err(_) => format!("once at {run_at}"),
            },
            ScheduleSpec::Cron { cron } => CronSpec::parse(cron)
                .map(|spec| spec.describe())
                .unwrap_or_else(|_| format!("cron {cron:?}")),
            ScheduleSpec::Fields(fields) => CronSpec::from_fields(fields)
                .map(|spec| spec.describe())
                .unwrap_or_else(|_| "recurring".into()),
        }
    }
}
