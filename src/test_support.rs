//! In-memory ISS stand-in for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde_json::{json, Value};

use crate::fetch::{FetchResult, HttpClient, HttpResponse};

/// Rows ISS hands out per call no matter how large a `limit` is requested.
const SERVER_PAGE_CAP: usize = 500;

const CANDLE_COLUMNS: [&str; 8] = [
    "open", "close", "high", "low", "value", "volume", "begin", "end",
];

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

#[derive(Debug, Clone)]
struct MockCandle {
    begin: NaiveDateTime,
    end: NaiveDateTime,
    open: f64,
    volume: u64,
}

/// Serves synthetic candles and a fixed securities listing, counting calls and
/// concurrency. Query parameters `from`, `till`, `start` and `limit` are
/// honoured the way ISS honours them; `interval` is ignored.
pub struct MockIss {
    candles: Vec<MockCandle>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failures: AtomicUsize,
    malformed: AtomicBool,
    shifted: AtomicBool,
    queries: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockIss {
    fn with_candles(candles: Vec<MockCandle>) -> Self {
        Self {
            candles,
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            malformed: AtomicBool::new(false),
            shifted: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// One daily candle per weekday in `[from, till]`.
    pub fn daily(from: NaiveDate, till: NaiveDate) -> Self {
        let candles = from
            .iter_days()
            .take_while(|day| *day <= till)
            .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
            .enumerate()
            .map(|(index, day)| MockCandle {
                begin: day.and_time(NaiveTime::MIN),
                end: day.and_hms_opt(23, 59, 59).expect("valid end of day"),
                open: 100.0 + index as f64 * 0.25,
                volume: 1_000 + index as u64,
            })
            .collect();
        Self::with_candles(candles)
    }

    /// Minute candles from 10:00 to 18:39 on each weekday in `[from, till]`.
    pub fn minutes(from: NaiveDate, till: NaiveDate) -> Self {
        let mut candles = Vec::new();
        for day in from.iter_days().take_while(|day| *day <= till) {
            if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            for minute in 0..520 {
                let begin = day.and_hms_opt(10, 0, 0).expect("valid session open")
                    + chrono::Duration::minutes(minute);
                candles.push(MockCandle {
                    begin,
                    end: begin + chrono::Duration::seconds(59),
                    open: 250.0 + (candles.len() % 97) as f64 * 0.01,
                    volume: 10 + (candles.len() % 13) as u64,
                });
            }
        }
        Self::with_candles(candles)
    }

    /// Drop every candle dated inside `[from, till]`, as for a trading suspension.
    pub fn suspended(mut self, from: NaiveDate, till: NaiveDate) -> Self {
        self.candles
            .retain(|candle| candle.begin.date() < from || candle.begin.date() > till);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("latency lock") = latency;
    }

    /// Answer the next `count` calls with HTTP 503.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn serve_malformed(&self, enabled: bool) {
        self.malformed.store(enabled, Ordering::SeqCst);
    }

    /// Start every page after the first one row early, as when rows are
    /// inserted on the server between two calls.
    pub fn shift_pages(&self, enabled: bool) {
        self.shifted.store(enabled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.queries.lock().expect("queries lock").clone()
    }

    pub fn rows_between(&self, from: NaiveDate, till: NaiveDate) -> usize {
        self.window(Some(from), Some(till)).len()
    }

    fn window(&self, from: Option<NaiveDate>, till: Option<NaiveDate>) -> Vec<&MockCandle> {
        self.candles
            .iter()
            .filter(|candle| from.map_or(true, |from| candle.begin.date() >= from))
            .filter(|candle| till.map_or(true, |till| candle.begin.date() <= till))
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn candles_body(&self, url: &str, query: &[(String, String)]) -> String {
        let param = |key: &str| {
            query
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        };
        let parse_date =
            |value: Option<&str>| value.and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok());

        let start: usize = param("start").and_then(|v| v.parse().ok()).unwrap_or(0);
        let limit: usize = param("limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(SERVER_PAGE_CAP)
            .min(SERVER_PAGE_CAP);
        let start = if start > 0 && self.shifted.load(Ordering::SeqCst) {
            start - 1
        } else {
            start
        };

        let rows: Vec<&MockCandle> = self
            .window(parse_date(param("from")), parse_date(param("till")))
            .into_iter()
            .skip(start)
            .take(limit)
            .collect();

        if url.ends_with(".csv") {
            candles_csv(&rows)
        } else {
            candles_json(&rows)
        }
    }
}

fn candle_values(candle: &MockCandle) -> Vec<Value> {
    let close = candle.open + 0.5;
    vec![
        json!(candle.open),
        json!(close),
        json!(close + 0.25),
        json!(candle.open - 0.25),
        json!(close * candle.volume as f64),
        json!(candle.volume),
        json!(candle.begin.format("%Y-%m-%d %H:%M:%S").to_string()),
        json!(candle.end.format("%Y-%m-%d %H:%M:%S").to_string()),
    ]
}

fn candles_json(rows: &[&MockCandle]) -> String {
    let data: Vec<Value> = rows
        .iter()
        .map(|candle| Value::Array(candle_values(candle)))
        .collect();
    json!({ "candles": { "columns": CANDLE_COLUMNS, "data": data } }).to_string()
}

fn candles_csv(rows: &[&MockCandle]) -> String {
    let mut body = format!("candles\n\n{}\n", CANDLE_COLUMNS.join(";"));
    for candle in rows {
        let line = candle_values(candle)
            .iter()
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";");
        body.push_str(&line);
        body.push('\n');
    }
    body.push('\n');
    body
}

impl MockIss {
    /// Borders for every interval on two board groups; the second one only traded the first day.
    fn borders_body(&self, url: &str) -> String {
        let columns = ["begin", "end", "board_group_id", "interval"];
        let rows: Vec<Vec<String>> = match (self.candles.first(), self.candles.last()) {
            (Some(first), Some(last)) => [1, 10, 60, 24, 7, 31]
                .into_iter()
                .flat_map(|interval| {
                    let stamp = |at: NaiveDateTime| at.format("%Y-%m-%d %H:%M:%S").to_string();
                    [
                        vec![stamp(first.begin), stamp(last.end), "57".to_string(), interval.to_string()],
                        vec![stamp(first.begin), stamp(first.end), "6".to_string(), interval.to_string()],
                    ]
                })
                .collect(),
            _ => Vec::new(),
        };

        if url.ends_with(".csv") {
            let mut body = format!("borders\n\n{}\n", columns.join(";"));
            for row in &rows {
                body.push_str(&row.join(";"));
                body.push('\n');
            }
            body.push('\n');
            body
        } else {
            let data: Vec<Value> = rows
                .iter()
                .map(|row| {
                    Value::Array(vec![
                        Value::from(row[0].as_str()),
                        Value::from(row[1].as_str()),
                        Value::from(row[2].parse::<i64>().unwrap_or_default()),
                        Value::from(row[3].parse::<i64>().unwrap_or_default()),
                    ])
                })
                .collect();
            json!({ "borders": { "columns": columns, "data": data } }).to_string()
        }
    }
}

pub fn securities_json() -> String {
    json!({
        "securities": {
            "columns": ["SECID", "BOARDID", "SHORTNAME", "SECNAME", "SECTYPE", "BOARDGROUPID"],
            "data": [
                ["SBER", "TQBR", "Sberbank", "Sberbank of Russia PJSC", "1", 57],
                ["VTBR", "TQBR", "VTB", "VTB Bank PJSC", "1", 57],
                ["SBERP", "TQBR", "Sberbank-p", "Sberbank pref", "2", null],
                ["SBER", "SMAL", "Sberbank", "Sberbank of Russia PJSC", "1", 57]
            ]
        }
    })
    .to_string()
}

#[async_trait]
impl HttpClient for MockIss {
    async fn request(&self, url: &str, query: &[(String, String)]) -> FetchResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .expect("queries lock")
            .push((url.to_string(), query.to_vec()));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = *self.latency.lock().expect("latency lock");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.take_failure() {
            return Ok(HttpResponse {
                status: 503,
                body: "Service Unavailable".to_string(),
            });
        }

        if self.malformed.load(Ordering::SeqCst) {
            return Ok(HttpResponse::ok("<html><body>maintenance</body></html>"));
        }

        if url.contains("/candles.") {
            Ok(HttpResponse::ok(self.candles_body(url, query)))
        } else if url.contains("/candleborders.") {
            Ok(HttpResponse::ok(self.borders_body(url)))
        } else {
            Ok(HttpResponse::ok(securities_json()))
        }
    }
}
