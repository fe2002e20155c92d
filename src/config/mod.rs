use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;

pub mod loader;
pub mod validator;

pub use loader::load_client_config;

pub const ISS_BASE_URL: &str = "https://iss.moex.com/iss";
/// Rows ISS returns per call for candle and listing sections.
pub const ISS_PAGE_SIZE: usize = 500;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

const DEFAULT_USER_AGENT: &str = concat!("moex-history/", env!("CARGO_PKG_VERSION"));

/// Wire format requested from ISS; both carry the same columnar sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Csv,
}

impl ResponseFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Csv => "csv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ResponseFormat::Json),
            "csv" => Some(ResponseFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per page, the first one included.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Termination knobs for the backward walk used by "last N candles" requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountWalkConfig {
    pub history_floor: NaiveDate,
    /// Empty calendar days tolerated once some candles were found.
    pub empty_gap_days: i64,
    /// Empty calendar days tolerated before the first candle is found.
    pub leading_gap_days: i64,
    /// Ask ISS for the interval's first and last candle dates before walking.
    /// Known borders replace the empty-gap cutoff, so long suspensions are walked through.
    pub use_candle_borders: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplates {
    pub candles: String,
    pub candles_board: String,
    pub candle_borders: String,
    pub securities: String,
    pub board_group_securities: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub engine: String,
    pub market: String,
    pub board: Option<String>,
    pub format: ResponseFormat,
    pub page_size: usize,
    pub max_in_flight: usize,
    pub retry: RetryConfig,
    pub request_timeout: Duration,
    pub fetch_timeout: Option<Duration>,
    pub headers: HashMap<String, String>,
    pub endpoints: EndpointTemplates,
    pub count_walk: CountWalkConfig,
}

impl ClientConfig {
    pub fn builtin() -> Self {
        let headers = HashMap::from([
            ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
        ]);

        let endpoints = EndpointTemplates {
            candles: "{base_url}/engines/{engine}/markets/{market}/securities/{security}/candles.{format}"
                .to_string(),
            candles_board:
                "{base_url}/engines/{engine}/markets/{market}/boards/{board}/securities/{security}/candles.{format}"
                    .to_string(),
            candle_borders:
                "{base_url}/engines/{engine}/markets/{market}/securities/{security}/candleborders.{format}"
                    .to_string(),
            securities: "{base_url}/engines/{engine}/markets/{market}/securities.{format}"
                .to_string(),
            board_group_securities:
                "{base_url}/engines/{engine}/markets/{market}/boardgroups/{board_group}/securities.{format}"
                    .to_string(),
        };

        ClientConfig {
            base_url: ISS_BASE_URL.to_string(),
            engine: "stock".to_string(),
            market: "shares".to_string(),
            board: None,
            format: ResponseFormat::Json,
            page_size: ISS_PAGE_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retry: RetryConfig {
                attempts: 3,
                base_delay: Duration::from_millis(500),
            },
            request_timeout: Duration::from_secs(30),
            fetch_timeout: None,
            headers,
            endpoints,
            count_walk: CountWalkConfig {
                history_floor: NaiveDate::from_ymd_opt(1997, 1, 1).unwrap_or(NaiveDate::MIN),
                empty_gap_days: 31,
                leading_gap_days: 366,
                use_candle_borders: true,
            },
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// ISS never returns more than [`ISS_PAGE_SIZE`] rows per call, so larger sizes are capped.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, ISS_PAGE_SIZE);
        self
    }

    pub fn with_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry = RetryConfig {
            attempts: attempts.max(1),
            base_delay,
        };
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builtin()
    }
}
