use std::{collections::HashMap, fs, path::Path, time::Duration};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Context, FetchError, Result};

use super::{validator, ClientConfig, ResponseFormat, RetryConfig};

/// Load a client configuration from JSON, filling unspecified fields from the builtin defaults.
pub fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read client config JSON at {}", path.display()))?;

    let raw: RawClientConfig = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse client config JSON at {}", path.display()))?;

    let config = raw.into_client_config()?;
    validator::validate_client_config(&config)?;
    Ok(config)
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_client_config(path.as_ref())
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawClientConfig {
    base_url: Option<String>,
    engine: Option<String>,
    market: Option<String>,
    board: Option<String>,
    format: Option<String>,
    page_size: Option<usize>,
    max_in_flight: Option<usize>,
    #[serde(default)]
    retry: RawRetryConfig,
    request_timeout_secs: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    endpoints: RawEndpoints,
    #[serde(default)]
    count_mode: RawCountMode,
}

#[derive(Debug, Deserialize, Default)]
struct RawRetryConfig {
    attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawEndpoints {
    candles: Option<String>,
    candles_board: Option<String>,
    candle_borders: Option<String>,
    securities: Option<String>,
    board_group_securities: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawCountMode {
    history_floor: Option<String>,
    empty_gap_days: Option<i64>,
    leading_gap_days: Option<i64>,
    use_candle_borders: Option<bool>,
}

impl RawClientConfig {
    fn into_client_config(self) -> Result<ClientConfig> {
        let mut config = ClientConfig::builtin();

        if let Some(base_url) = self.base_url {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(market) = self.market {
            config.market = market;
        }
        config.board = self.board.filter(|board| !board.trim().is_empty());

        if let Some(format) = self.format {
            config.format = ResponseFormat::parse(&format).ok_or_else(|| {
                FetchError::message(format!("unsupported response format `{format}`"))
            })?;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            config.max_in_flight = max_in_flight;
        }

        config.retry = RetryConfig {
            attempts: self.retry.attempts.unwrap_or(config.retry.attempts),
            base_delay: self
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(config.retry.base_delay),
        };

        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        config.fetch_timeout = self.fetch_timeout_secs.map(Duration::from_secs);

        // Explicit headers extend the defaults; an identical name replaces the default value.
        config.headers.extend(self.headers);

        let endpoints = self.endpoints;
        if let Some(template) = endpoints.candles {
            config.endpoints.candles = template;
        }
        if let Some(template) = endpoints.candles_board {
            config.endpoints.candles_board = template;
        }
        if let Some(template) = endpoints.candle_borders {
            config.endpoints.candle_borders = template;
        }
        if let Some(template) = endpoints.securities {
            config.endpoints.securities = template;
        }
        if let Some(template) = endpoints.board_group_securities {
            config.endpoints.board_group_securities = template;
        }

        let count_mode = self.count_mode;
        if let Some(floor) = count_mode.history_floor {
            config.count_walk.history_floor = NaiveDate::parse_from_str(floor.trim(), "%Y-%m-%d")
                .with_context(|| format!("count_mode.history_floor `{floor}` is not YYYY-MM-DD"))?;
        }
        if let Some(days) = count_mode.empty_gap_days {
            config.count_walk.empty_gap_days = days;
        }
        if let Some(days) = count_mode.leading_gap_days {
            config.count_walk.leading_gap_days = days;
        }
        if let Some(enabled) = count_mode.use_candle_borders {
            config.count_walk.use_candle_borders = enabled;
        }

        Ok(config)
    }
}
