use std::sync::Arc;

use chrono::NaiveDate;
use log::debug;

use crate::config::{ClientConfig, ISS_PAGE_SIZE};
use crate::error::FetchError;
use crate::utils::parse_timestamp;

use super::decode::{decode_section, find_value, value_to_string};
use super::request::{
    borders_query, candle_borders_url, candle_query, candles_url, securities_query,
    securities_url, BORDERS_SECTION, CANDLES_SECTION, SECURITIES_SECTION,
};
use super::{FetchResult, HistoryBounds, HttpClient, Interval, PageDescriptor, RawPage, RawRow};

const BODY_SNIPPET_LEN: usize = 160;

/// Issues exactly one ISS call per invocation and decodes the columnar section it returns.
pub struct PageRequester {
    http: Arc<dyn HttpClient>,
    config: Arc<ClientConfig>,
    page_size: usize,
}

impl PageRequester {
    pub fn new(http: Arc<dyn HttpClient>, config: Arc<ClientConfig>) -> Self {
        let page_size = config.page_size.clamp(1, ISS_PAGE_SIZE);
        Self {
            http,
            config,
            page_size,
        }
    }

    pub async fn fetch(&self, descriptor: &PageDescriptor) -> FetchResult<RawPage> {
        let url = candles_url(&self.config, &descriptor.security)?;
        let query = candle_query(descriptor, self.page_size);

        let rows = self.request_section(&url, &query, CANDLES_SECTION).await?;
        let is_final = rows.len() < self.page_size
            || passes_window_end(&rows, descriptor.window_end);

        debug!(
            "Fetched {} candle rows for {} (final: {})",
            rows.len(),
            descriptor,
            is_final
        );

        Ok(RawPage::new(rows, is_final))
    }

    /// Securities listings fit in one call; the page is always final.
    pub async fn fetch_securities(&self, board_group: Option<u32>) -> FetchResult<RawPage> {
        let url = securities_url(&self.config, board_group)?;
        let rows = self
            .request_section(&url, &securities_query(), SECURITIES_SECTION)
            .await?;

        debug!("Fetched {} security rows from {}", rows.len(), url);
        Ok(RawPage::new(rows, true))
    }

    /// First and last candle dates ISS reports for `interval`, across every board.
    ///
    /// `None` when ISS lists no candles of that interval for the security.
    pub async fn fetch_borders(
        &self,
        security: &str,
        interval: Interval,
    ) -> FetchResult<Option<HistoryBounds>> {
        let url = candle_borders_url(&self.config, security)?;
        let rows = self
            .request_section(&url, &borders_query(), BORDERS_SECTION)
            .await?;

        let mut bounds: Option<HistoryBounds> = None;
        for (index, row) in rows.iter().enumerate() {
            let code = find_value(row, &["interval"])
                .map(value_to_string)
                .and_then(|code| code.trim().parse::<u32>().ok());
            if code != Some(interval.remote_code()) {
                continue;
            }

            let first = border_date(row, "begin", index)?;
            let last = border_date(row, "end", index)?;
            bounds = Some(match bounds {
                Some(seen) => HistoryBounds {
                    first: seen.first.min(first),
                    last: seen.last.max(last),
                },
                None => HistoryBounds { first, last },
            });
        }

        debug!("Candle borders for {} at {}: {:?}", security, interval, bounds);
        Ok(bounds)
    }

    async fn request_section(
        &self,
        url: &str,
        query: &[(String, String)],
        section: &str,
    ) -> FetchResult<Vec<RawRow>> {
        let response = self.http.request(url, query).await?;

        if !response.is_success() {
            return Err(FetchError::transport(
                url,
                Some(response.status),
                format!("unexpected status, body: {}", snippet(&response.body)),
            ));
        }

        decode_section(&response.body, section, self.config.format)
    }
}

fn border_date(row: &RawRow, column: &str, index: usize) -> FetchResult<NaiveDate> {
    let text = find_value(row, &[column]).map(value_to_string).unwrap_or_default();
    parse_timestamp(&text)
        .map(|timestamp| timestamp.date())
        .ok_or_else(|| {
            FetchError::coercion(column, index, format!("expected a timestamp, found `{text}`"))
        })
}

/// True once the newest row already lies past the window ISS was asked for.
fn passes_window_end(rows: &[RawRow], window_end: Option<NaiveDate>) -> bool {
    let Some(window_end) = window_end else {
        return false;
    };

    rows.last()
        .and_then(|row| find_value(row, &["begin"]))
        .and_then(|value| parse_timestamp(&value_to_string(value)))
        .map(|begin| begin.date() > window_end)
        .unwrap_or(false)
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
