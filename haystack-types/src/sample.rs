//! Time-series samples and query ranges.

use crate::Error;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of a single history sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Bool(bool),
    Str(String),
}

/// One timestamped history sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts: DateTime<Utc>,
    pub value: SampleValue,
}

impl Sample {
    #[must_use]
    pub fn new(ts: DateTime<Utc>, value: SampleValue) -> Self {
        Self { ts, value }
    }

    /// Numeric sample.
    #[must_use]
    pub fn number(ts: DateTime<Utc>, value: f64) -> Self {
        Self::new(ts, SampleValue::Number(value))
    }
}

/// Inclusive time window for history reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, Error> {
        if start > end {
            return Err(Error::InvalidTimeRange(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses a range from RFC 3339 instants or bare `YYYY-MM-DD` dates.
    ///
    /// A bare start date means the start of that day and a bare end date the
    /// last second of that day, both in UTC.
    pub fn parse(start: &str, end: &str) -> Result<Self, Error> {
        let start = parse_bound(start, time_of_day(0, 0, 0)?)?;
        let end = parse_bound(end, time_of_day(23, 59, 59)?)?;
        Self::new(start, end)
    }

    /// Returns true if `ts` falls inside the range.
    #[must_use]
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

fn time_of_day(hour: u32, min: u32, sec: u32) -> Result<NaiveTime, Error> {
    NaiveTime::from_hms_opt(hour, min, sec)
        .ok_or_else(|| Error::InvalidTimeRange(format!("{hour}:{min}:{sec}")))
}

fn parse_bound(raw: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>, Error> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(time_of_day).and_utc())
        .map_err(|_| Error::InvalidTimeRange(format!("unrecognised timestamp {raw:?}")))
}
