use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use log::info;
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::error::{FetchError, Result};
use crate::fetch::{
    with_retry, FetchMode, FetchOrchestrator, FetchRequest, HttpClient, PageRequester, Plan,
    RangePlanner, ReqwestClient,
};
use crate::records::{normalize, CandleRow, SecurityRow, Table};
use crate::utils::today;

/// Public entry point: candle history and security listings from ISS as typed tables.
pub struct IssClient {
    config: Arc<ClientConfig>,
    requester: Arc<PageRequester>,
    planner: RangePlanner,
    orchestrator: FetchOrchestrator,
}

impl IssClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = ReqwestClient::from_config(&config)?;
        Ok(Self::with_http(config, Arc::new(http)))
    }

    /// Build a client over any HTTP capability.
    pub fn with_http(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        let config = Arc::new(config);
        let requester = Arc::new(PageRequester::new(http, Arc::clone(&config)));
        let planner = RangePlanner::new(config.page_size, config.count_walk);
        let orchestrator =
            FetchOrchestrator::new(Arc::clone(&requester), config.max_in_flight, config.retry);

        Self {
            config,
            requester,
            planner,
            orchestrator,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Candles for `security` at `interval` (`1`, `10`, `60`, `D`, `W` or `M`).
    ///
    /// `count` returns the most recent rows up to `till_date` (or today).
    /// Otherwise the optional bounds select an inclusive window; with neither
    /// bound the whole available history is returned.
    pub async fn get_candles(
        &self,
        security: &str,
        interval: &str,
        from_date: Option<NaiveDate>,
        till_date: Option<NaiveDate>,
        count: Option<usize>,
    ) -> Result<Table<CandleRow>> {
        let mut request = FetchRequest::new(security, interval)?;
        request.from_date = from_date;
        request.till_date = till_date;
        request.count = count;
        self.fetch_candles(&request).await
    }

    pub async fn fetch_candles(&self, request: &FetchRequest) -> Result<Table<CandleRow>> {
        self.fetch_candles_at(request, today()).await
    }

    async fn fetch_candles_at(
        &self,
        request: &FetchRequest,
        today: NaiveDate,
    ) -> Result<Table<CandleRow>> {
        let mode = request.mode()?;
        let mut plan = self.planner.plan(request, today)?;

        let pages = self
            .with_deadline(async {
                if let Plan::Backward(walk) = &mut plan {
                    if self.config.count_walk.use_candle_borders {
                        let requester = &self.requester;
                        let bounds = with_retry(&self.config.retry, move || {
                            requester.fetch_borders(&request.security, request.interval)
                        })
                        .await?;
                        walk.bound_history(bounds);
                    }
                }
                self.orchestrator.run(plan).await
            })
            .await?;
        let mut table = normalize::<CandleRow>(&pages)?;

        match mode {
            FetchMode::Range { from, till } => table.retain(|row| {
                let day = row.begin.date();
                from.map_or(true, |from| day >= from) && till.map_or(true, |till| day <= till)
            }),
            FetchMode::Latest { count, till } => {
                if let Some(till) = till {
                    table.retain(|row| row.begin.date() <= till);
                }
                table.retain_last(count);
            }
        }

        info!(
            "Fetched {} {} candles for {} over {} pages",
            table.len(),
            request.interval,
            request.security,
            pages.len()
        );

        Ok(table)
    }

    /// Securities listed on the configured market, or on one board group of it.
    pub async fn get_securities(&self, board_group: Option<u32>) -> Result<Table<SecurityRow>> {
        let requester = &self.requester;
        let page = self
            .with_deadline(with_retry(&self.config.retry, move || {
                requester.fetch_securities(board_group)
            }))
            .await?;

        let table = normalize::<SecurityRow>(std::slice::from_ref(&page))?;
        let rows = table
            .into_rows()
            .into_iter()
            .map(|mut row| {
                row.board_group = row.board_group.or(board_group.map(i64::from));
                row
            })
            .collect();

        let table = Table::new(rows);
        info!("Fetched {} securities", table.len());
        Ok(table)
    }

    /// Apply the overall fetch deadline, dropping every in-flight request on expiry.
    async fn with_deadline<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.fetch_timeout {
            Some(limit) => timeout(limit, work)
                .await
                .map_err(|_| FetchError::Cancelled)?,
            None => work.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::ResponseFormat;
    use crate::test_support::{date, MockIss};

    fn client(mock: &Arc<MockIss>, config: ClientConfig) -> IssClient {
        IssClient::with_http(config.with_retry(3, Duration::from_millis(1)), mock.clone())
    }

    fn assert_strictly_increasing(table: &Table<CandleRow>) {
        assert!(table
            .rows()
            .windows(2)
            .all(|pair| pair[0].begin < pair[1].begin));
    }

    #[tokio::test]
    async fn latest_ten_daily_candles() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let client = client(&mock, ClientConfig::builtin());
        let request = FetchRequest::new("SBER", "D").unwrap().count(10);

        let table = client
            .fetch_candles_at(&request, date(2024, 6, 30))
            .await
            .unwrap();

        assert_eq!(table.len(), 10);
        assert_eq!(
            table.columns(),
            vec!["open", "high", "low", "close", "volume", "begin", "end"]
        );
        assert_strictly_increasing(&table);
        let last = table.rows().last().unwrap();
        assert_eq!(last.begin.date(), date(2024, 6, 28));
        assert_eq!(table.rows()[0].begin.date(), date(2024, 6, 17));
    }

    #[tokio::test]
    async fn latest_candles_respect_till_anchor() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let client = client(&mock, ClientConfig::builtin());
        let request = FetchRequest::new("SBER", "D")
            .unwrap()
            .count(3)
            .till_date(date(2024, 3, 6));

        let table = client
            .fetch_candles_at(&request, date(2024, 6, 30))
            .await
            .unwrap();

        let days: Vec<NaiveDate> = table.rows().iter().map(|row| row.begin.date()).collect();
        assert_eq!(days, vec![date(2024, 3, 4), date(2024, 3, 5), date(2024, 3, 6)]);
    }

    #[tokio::test]
    async fn latest_minutes_page_within_each_day() {
        let mock = Arc::new(MockIss::minutes(date(2024, 6, 24), date(2024, 6, 28)));
        mock.set_latency(Duration::from_millis(5));
        let client = client(&mock, ClientConfig::builtin().with_max_in_flight(2));
        let request = FetchRequest::new("SBER", "1").unwrap().count(1_200);

        let table = client
            .fetch_candles_at(&request, date(2024, 6, 28))
            .await
            .unwrap();

        assert_eq!(table.len(), 1_200);
        assert_strictly_increasing(&table);
        let last = table.rows().last().unwrap();
        assert_eq!(last.begin, date(2024, 6, 28).and_hms_opt(18, 39, 0).unwrap());
        assert!(mock.peak_in_flight() <= 2, "peak was {}", mock.peak_in_flight());
    }

    fn suspended_minutes() -> MockIss {
        MockIss::minutes(date(2024, 1, 8), date(2024, 3, 22))
            .suspended(date(2024, 1, 13), date(2024, 3, 17))
    }

    #[tokio::test]
    async fn latest_minutes_reach_across_long_suspension() {
        let mock = Arc::new(suspended_minutes());
        let client = client(&mock, ClientConfig::builtin());
        let request = FetchRequest::new("SBER", "1").unwrap().count(3_000);

        let table = client
            .fetch_candles_at(&request, date(2024, 3, 22))
            .await
            .unwrap();

        assert_eq!(table.len(), 3_000);
        assert_strictly_increasing(&table);
        assert_eq!(
            table.rows()[0].begin,
            date(2024, 1, 12).and_hms_opt(12, 0, 0).unwrap()
        );
        assert!(mock
            .queries()
            .iter()
            .any(|(url, _)| url.ends_with("/candleborders.json")));
    }

    #[tokio::test]
    async fn without_borders_the_gap_limit_ends_the_walk() {
        let mock = Arc::new(suspended_minutes());
        let mut config = ClientConfig::builtin();
        config.count_walk.use_candle_borders = false;
        let client = client(&mock, config);
        let request = FetchRequest::new("SBER", "1").unwrap().count(3_000);

        let table = client
            .fetch_candles_at(&request, date(2024, 3, 22))
            .await
            .unwrap();

        assert_eq!(table.len(), mock.rows_between(date(2024, 3, 18), date(2024, 3, 22)));
        assert!(mock
            .queries()
            .iter()
            .all(|(url, _)| !url.contains("candleborders")));
    }

    #[tokio::test]
    async fn security_without_candles_returns_empty_table() {
        let mock = Arc::new(MockIss::daily(date(2024, 1, 6), date(2024, 1, 7)));
        let client = client(&mock, ClientConfig::builtin());
        let request = FetchRequest::new("SBER", "D").unwrap().count(10);

        let table = client
            .fetch_candles_at(&request, date(2024, 6, 30))
            .await
            .unwrap();

        assert!(table.is_empty());
        assert_eq!(mock.calls(), 1, "only the borders lookup is made");
    }

    #[tokio::test]
    async fn oversized_page_size_still_returns_every_row() {
        let mock = Arc::new(MockIss::daily(date(2022, 1, 3), date(2024, 6, 28)));
        let mut config = ClientConfig::builtin();
        config.page_size = 1_000;
        let client = client(&mock, config);

        let table = client
            .get_candles("SBER", "D", Some(date(2022, 1, 1)), Some(date(2024, 6, 30)), None)
            .await
            .unwrap();

        assert_eq!(table.len(), mock.rows_between(date(2022, 1, 1), date(2024, 6, 30)));
        assert!(table.len() > 500);
        assert_strictly_increasing(&table);
    }

    #[tokio::test]
    async fn short_history_returns_everything_available() {
        let mock = Arc::new(MockIss::daily(date(2024, 1, 1), date(2024, 3, 1)));
        let client = client(&mock, ClientConfig::builtin());
        let request = FetchRequest::new("SBER", "D").unwrap().count(10_000);

        let table = client
            .fetch_candles_at(&request, date(2024, 3, 1))
            .await
            .unwrap();

        assert_eq!(table.len(), mock.rows_between(date(2024, 1, 1), date(2024, 3, 1)));
        assert!(mock.calls() <= 2, "walk should stop at the first trading day");
    }

    #[tokio::test]
    async fn window_returns_only_rows_inside_it() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let client = client(&mock, ClientConfig::builtin());

        let table = client
            .get_candles("VTBR", "D", Some(date(2024, 1, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap();

        assert_eq!(table.len(), mock.rows_between(date(2024, 1, 1), date(2024, 3, 1)));
        assert!(table.rows().iter().all(|row| {
            let day = row.begin.date();
            day >= date(2024, 1, 1) && day <= date(2024, 3, 1)
        }));
        assert_strictly_increasing(&table);
    }

    #[tokio::test]
    async fn window_without_trading_days_is_empty() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let client = client(&mock, ClientConfig::builtin());

        let table = client
            .get_candles("VTBR", "D", Some(date(2024, 1, 6)), Some(date(2024, 1, 7)), None)
            .await
            .unwrap();

        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn open_range_walks_to_the_end_of_history() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let client = client(&mock, ClientConfig::builtin().with_page_size(100));

        let table = client
            .get_candles("SBER", "D", Some(date(2023, 6, 1)), None, None)
            .await
            .unwrap();

        assert_eq!(table.len(), mock.rows_between(date(2023, 6, 1), date(2024, 6, 28)));
        assert_strictly_increasing(&table);
    }

    #[tokio::test]
    async fn unknown_interval_fails_before_any_call() {
        let mock = Arc::new(MockIss::daily(date(2024, 1, 1), date(2024, 3, 1)));
        let client = client(&mock, ClientConfig::builtin());

        let err = client
            .get_candles("SBER", "XYZ", None, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Validation(_)), "{err}");
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn count_with_from_date_fails_before_any_call() {
        let mock = Arc::new(MockIss::daily(date(2024, 1, 1), date(2024, 3, 1)));
        let client = client(&mock, ClientConfig::builtin());

        let err = client
            .get_candles("SBER", "D", Some(date(2024, 1, 1)), None, Some(5))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Validation(_)), "{err}");
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn overlapping_pages_yield_each_row_once() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        mock.shift_pages(true);
        let client = client(&mock, ClientConfig::builtin().with_page_size(20));

        let table = client
            .get_candles("SBER", "D", Some(date(2024, 1, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap();

        assert_eq!(table.len(), mock.rows_between(date(2024, 1, 1), date(2024, 3, 1)));
        assert_strictly_increasing(&table);
    }

    #[tokio::test]
    async fn identical_requests_give_identical_tables() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let client = client(&mock, ClientConfig::builtin().with_page_size(50));

        let first = client
            .get_candles("SBER", "D", Some(date(2023, 3, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap();
        let second = client
            .get_candles("SBER", "D", Some(date(2023, 3, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn csv_responses_match_json_responses() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        let json_client = client(&mock, ClientConfig::builtin());
        let csv_client = client(&mock, ClientConfig::builtin().with_format(ResponseFormat::Csv));

        let from_json = json_client
            .get_candles("SBER", "D", Some(date(2024, 1, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap();
        let from_csv = csv_client
            .get_candles("SBER", "D", Some(date(2024, 1, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap();

        assert_eq!(from_json, from_csv);
        assert!(mock
            .queries()
            .iter()
            .any(|(url, _)| url.ends_with("/candles.csv")));
    }

    #[tokio::test]
    async fn concurrency_stays_within_limit() {
        let mock = Arc::new(MockIss::daily(date(2020, 1, 1), date(2024, 6, 28)));
        mock.set_latency(Duration::from_millis(5));
        let client = client(
            &mock,
            ClientConfig::builtin()
                .with_page_size(25)
                .with_max_in_flight(2),
        );

        client
            .get_candles("SBER", "D", Some(date(2021, 1, 1)), Some(date(2023, 12, 31)), None)
            .await
            .unwrap();

        assert!(mock.peak_in_flight() <= 2, "peak was {}", mock.peak_in_flight());
    }

    #[tokio::test]
    async fn deadline_cancels_the_fetch() {
        let mock = Arc::new(MockIss::daily(date(2023, 1, 2), date(2024, 6, 28)));
        mock.set_latency(Duration::from_millis(200));
        let client = client(
            &mock,
            ClientConfig::builtin().with_fetch_timeout(Duration::from_millis(20)),
        );

        let err = client
            .get_candles("SBER", "D", Some(date(2024, 1, 1)), Some(date(2024, 3, 1)), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled), "{err}");
    }

    #[tokio::test]
    async fn securities_fill_requested_board_group() {
        let mock = Arc::new(MockIss::daily(date(2024, 1, 1), date(2024, 1, 5)));
        let client = client(&mock, ClientConfig::builtin());

        let table = client.get_securities(Some(57)).await.unwrap();

        assert_eq!(table.columns(), vec!["secid", "name", "type", "board_group"]);
        let ids: Vec<&str> = table.rows().iter().map(|row| row.secid.as_str()).collect();
        assert_eq!(ids, vec!["SBER", "VTBR", "SBERP"]);
        assert!(table.rows().iter().all(|row| row.board_group == Some(57)));
        assert_eq!(mock.calls(), 1);
        assert!(mock.queries()[0].0.ends_with("/boardgroups/57/securities.json"));
    }

    #[tokio::test]
    async fn securities_retry_transient_failures() {
        let mock = Arc::new(MockIss::daily(date(2024, 1, 1), date(2024, 1, 5)));
        mock.fail_next(1);
        let client = client(&mock, ClientConfig::builtin());

        let table = client.get_securities(None).await.unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[2].board_group, None);
        assert_eq!(mock.calls(), 2);
    }
}
