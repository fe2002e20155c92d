use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::FetchError;

use super::{FetchResult, PageDescriptor, PagePlan, PageRequester, Plan, RawPage};

/// Run `operation` until it succeeds, fails with a non-retryable error, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, mut operation: F) -> FetchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, attempts, err, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Drives the page requester with at most `max_in_flight` outstanding calls.
///
/// Each call holds a permit only while its request is on the wire, so a page
/// sleeping through backoff does not block the others. The first error that
/// survives retry drops the whole stream, which cancels every call still in
/// flight; no partial result is returned.
pub struct FetchOrchestrator {
    requester: Arc<PageRequester>,
    max_in_flight: usize,
    retry: RetryConfig,
    permits: Arc<Semaphore>,
}

impl FetchOrchestrator {
    pub fn new(requester: Arc<PageRequester>, max_in_flight: usize, retry: RetryConfig) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            requester,
            max_in_flight,
            retry,
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Fetch every page the plan needs and return them in chronological order.
    pub async fn run(&self, plan: Plan) -> FetchResult<Vec<RawPage>> {
        match plan {
            Plan::Bounded(bounded) => self.run_descriptors(bounded.into_descriptors()).await,
            mut open => self.run_open_ended(&mut open).await,
        }
    }

    /// Sliding window over a precomputed descriptor list.
    ///
    /// Descriptors stop being admitted once a page at a lower offset has come
    /// back final; pages past that offset that were already in flight are
    /// discarded from the result.
    pub async fn run_descriptors(
        &self,
        descriptors: Vec<PageDescriptor>,
    ) -> FetchResult<Vec<RawPage>> {
        let planned = descriptors.len();
        let cutoff = AtomicUsize::new(usize::MAX);

        let mut fetched: Vec<(usize, usize, RawPage)> = stream::iter(descriptors.into_iter().enumerate())
            .take_while(|(_, descriptor)| {
                future::ready(descriptor.offset <= cutoff.load(Ordering::SeqCst))
            })
            .map(|(index, descriptor)| {
                let cutoff = &cutoff;
                async move {
                    let page = self.fetch_page(&descriptor).await?;
                    if page.is_final {
                        cutoff.fetch_min(descriptor.offset, Ordering::SeqCst);
                    }
                    Ok::<_, FetchError>((index, descriptor.offset, page))
                }
            })
            .buffer_unordered(self.max_in_flight)
            .try_collect()
            .await?;

        let cutoff = cutoff.load(Ordering::SeqCst);
        let dispatched = fetched.len();
        fetched.retain(|(_, offset, _)| *offset <= cutoff);
        fetched.sort_by_key(|(index, _, _)| *index);

        debug!(
            "Bounded plan: {} planned, {} dispatched, {} kept",
            planned,
            dispatched,
            fetched.len()
        );

        Ok(fetched.into_iter().map(|(_, _, page)| page).collect())
    }

    /// Batch loop for plans that only know their next step after observing the last one.
    pub async fn run_open_ended<P: PagePlan>(&self, plan: &mut P) -> FetchResult<Vec<RawPage>> {
        let mut fetched: Vec<(PageDescriptor, RawPage)> = Vec::new();
        let mut batches = 0;

        while !plan.is_exhausted() {
            let batch = plan.next_batch(self.max_in_flight);
            if batch.is_empty() {
                break;
            }
            batches += 1;

            let results: Vec<(PageDescriptor, RawPage)> = stream::iter(batch)
                .map(|descriptor| async move {
                    let page = self.fetch_page(&descriptor).await?;
                    Ok::<_, FetchError>((descriptor, page))
                })
                .buffer_unordered(self.max_in_flight)
                .try_collect()
                .await?;

            for (descriptor, page) in &results {
                plan.observe(descriptor, page);
            }
            fetched.extend(results);
        }

        debug!(
            "Open-ended plan: {} pages over {} batches",
            fetched.len(),
            batches
        );

        fetched.sort_by(|(a, _), (b, _)| a.order_key().cmp(&b.order_key()));
        Ok(fetched.into_iter().map(|(_, page)| page).collect())
    }

    async fn fetch_page(&self, descriptor: &PageDescriptor) -> FetchResult<RawPage> {
        let permits = &self.permits;
        let requester = &self.requester;

        with_retry(&self.retry, move || async move {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| FetchError::Cancelled)?;
            requester.fetch(descriptor).await
        })
        .await
    }
}
