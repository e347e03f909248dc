//! PartitionKey - time bucket identifier
//!
//! A key is the UTC-aligned start of a bucket plus the granularity that
//! produced it. Keys order by bucket start, so key order follows timestamp
//! order for a fixed granularity.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

/// Segment (bucket) granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Second,
    Minute,
    FiveMinute,
    TenMinute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
    SixHour,
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    /// Fixed bucket length in milliseconds, `None` for calendar granularities
    pub fn fixed_millis(self) -> Option<i64> {
        match self {
            Self::Second => Some(SECOND_MS),
            Self::Minute => Some(MINUTE_MS),
            Self::FiveMinute => Some(5 * MINUTE_MS),
            Self::TenMinute => Some(10 * MINUTE_MS),
            Self::FifteenMinute => Some(15 * MINUTE_MS),
            Self::ThirtyMinute => Some(30 * MINUTE_MS),
            Self::Hour => Some(HOUR_MS),
            Self::SixHour => Some(6 * HOUR_MS),
            Self::Day => Some(DAY_MS),
            Self::Week => Some(WEEK_MS),
            Self::Month | Self::Year => None,
        }
    }

    /// Upper bound on the bucket length, used for config sanity checks
    pub fn max_duration(self) -> Duration {
        let ms = match self {
            Self::Month => 31 * DAY_MS,
            Self::Year => 366 * DAY_MS,
            other => other.fixed_millis().unwrap_or(DAY_MS),
        };
        Duration::from_millis(ms as u64)
    }

    /// Truncate epoch millis to the start of its bucket.
    ///
    /// Returns `None` when the instant cannot be represented as a calendar date.
    pub fn truncate(self, ms: i64) -> Option<i64> {
        match self {
            // ISO weeks start on Monday; 1970-01-01 was a Thursday.
            Self::Week => {
                let days = ms.div_euclid(DAY_MS);
                let since_monday = (days + 3).rem_euclid(7);
                Some((days - since_monday) * DAY_MS)
            }
            Self::Month | Self::Year => {
                let dt = DateTime::<Utc>::from_timestamp_millis(ms)?;
                let month = if self == Self::Year { 1 } else { dt.month() };
                let date = NaiveDate::from_ymd_opt(dt.year(), month, 1)?;
                Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?).timestamp_millis())
            }
            fixed => {
                let size = fixed.fixed_millis()?;
                Some(ms.div_euclid(size) * size)
            }
        }
    }

    /// Start of the bucket following the one that starts at `start_ms`
    pub fn next(self, start_ms: i64) -> Option<i64> {
        match self {
            Self::Month | Self::Year => {
                let months = if self == Self::Year { 12 } else { 1 };
                let dt = DateTime::<Utc>::from_timestamp_millis(start_ms)?;
                Some(dt.checked_add_months(Months::new(months))?.timestamp_millis())
            }
            fixed => start_ms.checked_add(fixed.fixed_millis()?),
        }
    }

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::FiveMinute => "five_minute",
            Self::TenMinute => "ten_minute",
            Self::FifteenMinute => "fifteen_minute",
            Self::ThirtyMinute => "thirty_minute",
            Self::Hour => "hour",
            Self::SixHour => "six_hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let granularity = match normalized.as_str() {
            "second" => Self::Second,
            "minute" => Self::Minute,
            "five_minute" => Self::FiveMinute,
            "ten_minute" => Self::TenMinute,
            "fifteen_minute" => Self::FifteenMinute,
            "thirty_minute" => Self::ThirtyMinute,
            "hour" => Self::Hour,
            "six_hour" => Self::SixHour,
            "day" => Self::Day,
            "week" => Self::Week,
            "month" => Self::Month,
            "year" => Self::Year,
            other => return Err(format!("unknown granularity '{other}'")),
        };
        Ok(granularity)
    }
}

/// Canonical partition key: bucket start (epoch millis) + granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    start_ms: i64,
    granularity: Granularity,
}

impl PartitionKey {
    /// Build a key from an already-truncated bucket start.
    ///
    /// Returns `None` if `start_ms` is not aligned to `granularity`.
    pub fn new(start_ms: i64, granularity: Granularity) -> Option<Self> {
        (granularity.truncate(start_ms)? == start_ms).then_some(Self {
            start_ms,
            granularity,
        })
    }

    /// Key of the bucket containing `ms`
    pub fn containing(ms: i64, granularity: Granularity) -> Option<Self> {
        Some(Self {
            start_ms: granularity.truncate(ms)?,
            granularity,
        })
    }

    #[inline]
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    #[inline]
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Exclusive end of the bucket
    pub fn end_ms(&self) -> i64 {
        self.granularity
            .next(self.start_ms)
            .unwrap_or(i64::MAX)
    }

    /// Bucket end plus the grace period
    pub fn window_deadline_ms(&self, window_period: Duration) -> i64 {
        self.end_ms()
            .saturating_add(window_period.as_millis().min(i64::MAX as u128) as i64)
    }

    /// Whether `ms` falls inside this bucket
    pub fn contains(&self, ms: i64) -> bool {
        ms >= self.start_ms && ms < self.end_ms()
    }

    /// The key after this one
    pub fn next(&self) -> Option<Self> {
        Some(Self {
            start_ms: self.granularity.next(self.start_ms)?,
            granularity: self.granularity,
        })
    }

    /// Compact UTC label for the bucket start, e.g. `20240101T1200Z`
    pub fn compact_start(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.start_ms)
            .map(|dt| dt.format("%Y%m%dT%H%MZ").to_string())
            .unwrap_or_else(|| self.start_ms.to_string())
    }

    /// Path-safe identifier used as a coordination-store node name
    pub fn node_name(&self) -> String {
        format!("{}-{}", self.granularity, self.start_ms)
    }

    /// Inverse of [`PartitionKey::node_name`]
    pub fn from_node_name(name: &str) -> Option<Self> {
        let (granularity, start) = name.split_once('-')?;
        Self::new(start.parse().ok()?, granularity.parse().ok()?)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = DateTime::<Utc>::from_timestamp_millis(self.start_ms);
        let end = DateTime::<Utc>::from_timestamp_millis(self.end_ms());
        match (start, end) {
            (Some(s), Some(e)) => write!(
                f,
                "{}/{}",
                s.format("%Y-%m-%dT%H:%M:%SZ"),
                e.format("%Y-%m-%dT%H:%M:%SZ")
            ),
            _ => write!(f, "{}", self.node_name()),
        }
    }
}
