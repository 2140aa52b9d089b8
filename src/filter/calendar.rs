//! Calendar operators over ISO-8601 timestamp strings.
//!
//! All calendar fields are taken in UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value};

use super::compile::Predicate;
use super::errors::{FilterError, FilterResult};
use super::operators::resolve_string;
use super::path::FieldPath;
use super::QueryContext;

const BOUND_KEYS: [&str; 5] = ["$eq", "$lt", "$lte", "$gt", "$gte"];

/// Parse a timestamp; values without an offset are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
}

fn timestamp_at(operator: &str, path: &FieldPath, doc: &Value) -> FilterResult<DateTime<Utc>> {
    let raw = resolve_string(operator, path, doc)?;
    parse_timestamp(&raw).ok_or_else(|| FilterError::InvalidDate {
        path: path.to_string(),
        value: raw,
    })
}

fn integer_config(operator: &str, config: &Value, range: (i64, i64)) -> FilterResult<i64> {
    let n = match config {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    };

    match n {
        Some(n) if (range.0..=range.1).contains(&n) => Ok(n),
        Some(n) => Err(FilterError::config(
            operator,
            format!("{n} is outside {}..={}", range.0, range.1),
        )),
        None => Err(FilterError::config(
            operator,
            format!("expected an integer, got {config}"),
        )),
    }
}

/// Shared shape of `$year`, `$month`, `$day` and `$dayOfWeek`.
fn field_equals(
    operator: &'static str,
    path: &FieldPath,
    config: &Value,
    range: (i64, i64),
    extract: fn(&DateTime<Utc>) -> i64,
) -> FilterResult<Predicate> {
    let expected = integer_config(operator, config, range)?;
    let path = path.clone();

    Ok(Predicate::new(operator, move |doc| {
        let ts = timestamp_at(operator, &path, doc)?;
        Ok(extract(&ts) == expected)
    }))
}

pub fn year(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    field_equals("$year", path, config, (i64::MIN, i64::MAX), |ts| ts.year() as i64)
}

pub fn month(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    field_equals("$month", path, config, (1, 12), |ts| ts.month() as i64)
}

pub fn day(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    field_equals("$day", path, config, (1, 31), |ts| ts.day() as i64)
}

/// ISO weekday: 1 is Monday, 7 is Sunday.
pub fn day_of_week(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    field_equals("$dayOfWeek", path, config, (1, 7), |ts| {
        ts.weekday().number_from_monday() as i64
    })
}

/// Time of day as `HH:MM:SS.mmmZ`.
fn time_of_day(ts: &DateTime<Utc>) -> String {
    ts.format("%H:%M:%S%.3fZ").to_string()
}

enum TimeMatch {
    Prefix(String),
    Bounds(Vec<(&'static str, String)>),
}

impl TimeMatch {
    fn parse(config: &Value) -> FilterResult<Self> {
        match config {
            Value::String(s) if !s.is_empty() && s.is_ascii() => Ok(TimeMatch::Prefix(s.clone())),
            Value::Object(map) => {
                let bounds = bound_strings("$time", map)?;
                if bounds.is_empty() {
                    return Err(FilterError::config(
                        "$time",
                        "expected object with $eq, $lt, $lte, $gt, or $gte",
                    ));
                }
                if bounds.iter().any(|(_, b)| !b.is_ascii()) {
                    return Err(FilterError::config("$time", "bounds must be HH:mm[:ss]"));
                }
                Ok(TimeMatch::Bounds(bounds))
            }
            _ => Err(FilterError::config(
                "$time",
                format!("expected \"HH:mm[:ss]\", got {config}"),
            )),
        }
    }

    fn matches(&self, time: &str) -> bool {
        match self {
            TimeMatch::Prefix(prefix) => time.starts_with(prefix.as_str()),
            TimeMatch::Bounds(bounds) => bounds.iter().all(|(key, bound)| {
                let head = time.get(..bound.len()).unwrap_or(time);
                match *key {
                    "$eq" => head == bound,
                    "$lt" => head < bound.as_str(),
                    "$lte" => head <= bound.as_str(),
                    "$gt" => head > bound.as_str(),
                    "$gte" => head >= bound.as_str(),
                    _ => false,
                }
            }),
        }
    }
}

/// `$time`: the UTC time of day starts with the configured `HH:mm[:ss]`,
/// or lies within bound object limits compared at the bound's precision.
pub fn time(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    let matcher = TimeMatch::parse(config)?;
    let path = path.clone();

    Ok(Predicate::new("$time", move |doc| {
        let ts = timestamp_at("$time", &path, doc)?;
        Ok(matcher.matches(&time_of_day(&ts)))
    }))
}

/// Non-empty string bounds present in `map`, in `BOUND_KEYS` order.
fn bound_strings(operator: &str, map: &Map<String, Value>) -> FilterResult<Vec<(&'static str, String)>> {
    let mut bounds = Vec::new();
    for key in BOUND_KEYS {
        match map.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.is_empty() => {}
            Some(Value::String(s)) => bounds.push((key, s.clone())),
            Some(other) => {
                return Err(FilterError::config(
                    operator,
                    format!("{key} expects a string, got {other}"),
                ))
            }
        }
    }
    Ok(bounds)
}

fn parse_day(raw: &str) -> FilterResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| FilterError::config("$date", format!("{raw:?} is not a YYYY-MM-DD date")))
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn day_end(day: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    day.and_time(last).and_utc()
}

/// Inclusive `[lower, upper]` range selected by a `$date` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}

impl DateRange {
    fn unbounded() -> Self {
        let lower = NaiveDate::from_ymd_opt(0, 1, 1).map(day_start);
        let upper = NaiveDate::from_ymd_opt(9999, 12, 31).map(day_end);
        Self {
            lower: lower.unwrap_or(DateTime::<Utc>::MIN_UTC),
            upper: upper.unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn whole_day(day: NaiveDate) -> Self {
        Self {
            lower: day_start(day),
            upper: day_end(day),
        }
    }

    /// Bounds are applied in the order `$lte`, `$gte`, `$lt`, `$gt`, `$eq`,
    /// each overriding what came before. `$lt` caps at the start of its day
    /// and `$gt` floors at the end of its day.
    pub fn parse(config: &Value) -> FilterResult<Self> {
        match config {
            Value::String(s) => Ok(Self::whole_day(parse_day(s)?)),
            Value::Object(map) => {
                if !BOUND_KEYS.iter().any(|k| map.contains_key(*k)) {
                    return Err(FilterError::config(
                        "$date",
                        "expected object with $eq, $lt, $lte, $gt, or $gte",
                    ));
                }

                let bounds = bound_strings("$date", map)?;
                let get = |key: &str| bounds.iter().find(|(k, _)| *k == key).map(|(_, v)| v);

                let mut range = Self::unbounded();
                if let Some(raw) = get("$lte") {
                    range.upper = day_end(parse_day(raw)?);
                }
                if let Some(raw) = get("$gte") {
                    range.lower = day_start(parse_day(raw)?);
                }
                if let Some(raw) = get("$lt") {
                    range.upper = day_start(parse_day(raw)?);
                }
                if let Some(raw) = get("$gt") {
                    range.lower = day_end(parse_day(raw)?);
                }
                if let Some(raw) = get("$eq") {
                    range = Self::whole_day(parse_day(raw)?);
                }
                Ok(range)
            }
            _ => Err(FilterError::config(
                "$date",
                format!("expected \"YYYY-MM-DD\" or a bound object, got {config}"),
            )),
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.lower <= *ts && *ts <= self.upper
    }
}

/// `$date`: the timestamp lies within the configured day range.
pub fn date(path: &FieldPath, config: &Value, _ctx: &QueryContext) -> FilterResult<Predicate> {
    let range = DateRange::parse(config)?;
    let path = path.clone();

    Ok(Predicate::new("$date", move |doc| {
        let ts = timestamp_at("$date", &path, doc)?;
        Ok(range.contains(&ts))
    }))
}
