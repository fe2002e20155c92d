use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::{FetchError, Result};

pub mod decode;
pub mod http;
pub mod orchestrator;
pub mod page;
pub mod planner;
pub mod request;

pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use orchestrator::{with_retry, FetchOrchestrator};
pub use page::PageRequester;
pub use planner::{PagePlan, Plan, RangePlanner};

pub type FetchResult<T> = Result<T>;

/// One decoded response row: column name to the loosely typed value ISS sent.
pub type RawRow = Map<String, Value>;

/// Candle bucket sizes ISS can aggregate; no local resampling happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Minute,
    TenMinutes,
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::Minute,
        Interval::TenMinutes,
        Interval::Hour,
        Interval::Day,
        Interval::Week,
        Interval::Month,
    ];

    /// Code accepted from callers.
    pub fn code(self) -> &'static str {
        match self {
            Interval::Minute => "1",
            Interval::TenMinutes => "10",
            Interval::Hour => "60",
            Interval::Day => "D",
            Interval::Week => "W",
            Interval::Month => "M",
        }
    }

    /// Identifier ISS expects in the `interval` query parameter.
    pub fn remote_code(self) -> u32 {
        match self {
            Interval::Minute => 1,
            Interval::TenMinutes => 10,
            Interval::Hour => 60,
            Interval::Day => 24,
            Interval::Week => 7,
            Interval::Month => 31,
        }
    }

    /// Nominal bucket length in minutes (a month counts as 30 days).
    pub fn minutes(self) -> i64 {
        match self {
            Interval::Minute => 1,
            Interval::TenMinutes => 10,
            Interval::Hour => 60,
            Interval::Day => 1_440,
            Interval::Week => 10_080,
            Interval::Month => 43_200,
        }
    }

    /// Shortest possible bucket, used when bounding how many candles a window can hold.
    pub fn min_minutes(self) -> i64 {
        match self {
            Interval::Month => 40_320,
            other => other.minutes(),
        }
    }
}

impl FromStr for Interval {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        Interval::ALL
            .into_iter()
            .find(|interval| interval.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                FetchError::validation(format!(
                    "unsupported interval `{trimmed}`; expected one of 1, 10, 60, D, W, M"
                ))
            })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Caller-facing candle request. Either `count` drives a backward walk, or the
/// optional date bounds drive a forward walk; neither means the whole history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub security: String,
    pub interval: Interval,
    pub from_date: Option<NaiveDate>,
    pub till_date: Option<NaiveDate>,
    pub count: Option<usize>,
}

/// How a validated request walks the remote data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Range {
        from: Option<NaiveDate>,
        till: Option<NaiveDate>,
    },
    Latest {
        count: usize,
        till: Option<NaiveDate>,
    },
}

impl FetchRequest {
    pub fn new(security: impl Into<String>, interval: &str) -> Result<Self> {
        Ok(Self {
            security: security.into(),
            interval: interval.parse()?,
            from_date: None,
            till_date: None,
            count: None,
        })
    }

    pub fn from_date(mut self, date: NaiveDate) -> Self {
        self.from_date = Some(date);
        self
    }

    pub fn till_date(mut self, date: NaiveDate) -> Self {
        self.till_date = Some(date);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Check field combinations and pick the walk; runs before any I/O.
    pub fn mode(&self) -> Result<FetchMode> {
        if self.security.trim().is_empty() {
            return Err(FetchError::validation("security id must not be empty"));
        }

        if let (Some(from), Some(till)) = (self.from_date, self.till_date) {
            if from > till {
                return Err(FetchError::validation(format!(
                    "from_date {from} is after till_date {till}"
                )));
            }
        }

        match self.count {
            Some(0) => Err(FetchError::validation("count must be a positive integer")),
            Some(_) if self.from_date.is_some() => Err(FetchError::validation(
                "count cannot be combined with from_date",
            )),
            Some(count) => Ok(FetchMode::Latest {
                count,
                till: self.till_date,
            }),
            None => Ok(FetchMode::Range {
                from: self.from_date,
                till: self.till_date,
            }),
        }
    }
}

/// Identifies exactly one bounded ISS call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageDescriptor {
    pub security: String,
    pub interval: Interval,
    pub offset: usize,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
}

impl PageDescriptor {
    /// Chronological position of the page: older windows first, then by offset.
    pub fn order_key(&self) -> (Option<NaiveDate>, usize) {
        (self.window_start, self.offset)
    }
}

impl fmt::Display for PageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} start={}", self.security, self.interval, self.offset)?;
        if let Some(start) = self.window_start {
            write!(f, " from={start}")?;
        }
        if let Some(end) = self.window_end {
            write!(f, " till={end}")?;
        }
        Ok(())
    }
}

/// First and last trading dates ISS holds for one security at one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryBounds {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub rows: Vec<RawRow>,
    pub is_final: bool,
}

impl RawPage {
    pub fn new(rows: Vec<RawRow>, is_final: bool) -> Self {
        Self { rows, is_final }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
