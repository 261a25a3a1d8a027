//! Fetch client: one upstream page at a time, with retries, admission control,
//! rate limiting and per-request timeouts.
//!
//! Every request, from every worker, first waits on the shared rate limiter
//! and then on a permit from the shared admission pool. Callers block on a
//! full pool; they never fail because of it.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use tokio::sync::Semaphore;

use super::schema;
use crate::error::{FetchError, FetchResult, PermanentKind, TransientKind};
use crate::traits::upstream::Upstream;
use crate::types::checkpoint::ResumePoint;
use crate::types::config::{PipelineConfig, RetryPolicy};
use crate::types::page::RawPage;
use crate::types::target::CrawlTarget;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct FetchClient<U: Upstream> {
    upstream: U,
    admission: Arc<Semaphore>,
    max_in_flight: usize,
    limiter: Option<Arc<DirectRateLimiter>>,
    retry: RetryPolicy,
    request_timeout: Duration,
    page_size: u32,
    max_pages: u32,
}

impl<U: Upstream> FetchClient<U> {
    pub fn new(upstream: U, config: &PipelineConfig) -> Self {
        let limiter = NonZeroU32::new(config.requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        Self {
            upstream,
            admission: Arc::new(Semaphore::new(config.max_in_flight)),
            max_in_flight: config.max_in_flight,
            limiter,
            retry: config.fetch_retry.clone(),
            request_timeout: config.request_timeout(),
            page_size: config.page_size,
            max_pages: config.max_pages_per_target,
        }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Requests currently holding an admission permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.admission.available_permits()
    }

    /// Fetch one page, retrying transient failures.
    ///
    /// Running out of attempts turns the last transient failure into
    /// [`PermanentKind::RetriesExhausted`] for this page only.
    pub async fn fetch(
        &self,
        target: &CrawlTarget,
        cursor: Option<&str>,
        page_index: u32,
    ) -> FetchResult<RawPage> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let kind = match self.attempt(target, cursor, page_index).await {
                Ok(page) => return Ok(page),
                Err(FetchError::Transient(kind)) => kind,
                Err(permanent) => return Err(permanent),
            };

            if attempt >= self.retry.max_attempts {
                return Err(FetchError::Permanent(PermanentKind::RetriesExhausted {
                    attempts: attempt,
                    last: kind,
                }));
            }

            let mut delay = self.retry.delay_for(attempt);
            if let TransientKind::RateLimited {
                retry_after: Some(after),
            } = &kind
            {
                delay = delay.max(*after);
            }

            tracing::warn!(
                target_index = target.index,
                city = %target.city,
                category = %target.category,
                page = page_index,
                cursor = ?cursor,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %kind,
                "Transient fetch failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        target: &CrawlTarget,
        cursor: Option<&str>,
        page_index: u32,
    ) -> FetchResult<RawPage> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let permit = self
            .admission
            .acquire()
            .await
            .map_err(|_| FetchError::Permanent(PermanentKind::AdmissionClosed))?;

        let response = tokio::time::timeout(
            self.request_timeout,
            self.upstream.request_page(target, cursor, self.page_size),
        )
        .await;
        drop(permit);

        let body = match response {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Transient(TransientKind::Timeout)),
        };

        let (payload, info) = schema::decode_envelope(&body)
            .map_err(|e| FetchError::Permanent(PermanentKind::MalformedEnvelope(e)))?;

        let mut page = RawPage::new(self.upstream.name(), target.clone(), page_index, payload)
            .with_cursor(cursor.map(String::from))
            .with_next_cursor(info.next_cursor);
        page.total_results = info.total_results;
        Ok(page)
    }

    /// Lazy page sequence for a target, starting at the target's cursor.
    pub fn pages(&self, target: CrawlTarget) -> TargetPages<'_, U> {
        let cursor = target.cursor.clone();
        TargetPages {
            client: self,
            target,
            cursor,
            next_page: 0,
            total: None,
            exhausted: false,
        }
    }
}

/// One step of a [`TargetPages`] sequence.
#[derive(Debug)]
pub enum PageOutcome {
    Fetched(RawPage),
    Failed {
        page_index: u32,
        cursor: Option<String>,
        error: FetchError,
    },
}

/// Pages of one target in cursor order.
///
/// Ends when the upstream reports no further page, when the page limit is
/// reached, or after a failed page the upstream cannot step over.
pub struct TargetPages<'a, U: Upstream> {
    client: &'a FetchClient<U>,
    target: CrawlTarget,
    cursor: Option<String>,
    next_page: u32,
    total: Option<u64>,
    exhausted: bool,
}

impl<U: Upstream> TargetPages<'_, U> {
    /// Continue from a persisted position instead of the beginning.
    pub fn resume(mut self, point: &ResumePoint) -> Self {
        self.cursor = point.cursor.clone();
        self.next_page = point.next_page;
        self.exhausted = point.exhausted;
        self
    }

    /// Where the next call would continue from.
    pub fn resume_point(&self) -> ResumePoint {
        ResumePoint {
            cursor: self.cursor.clone(),
            next_page: self.next_page,
            exhausted: self.is_exhausted(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.next_page >= self.client.max_pages
    }

    pub fn target(&self) -> &CrawlTarget {
        &self.target
    }

    pub async fn next_page(&mut self) -> Option<PageOutcome> {
        if self.is_exhausted() {
            return None;
        }

        let page_index = self.next_page;
        let cursor = self.cursor.clone();
        self.next_page += 1;

        match self.client.fetch(&self.target, cursor.as_deref(), page_index).await {
            Ok(page) => {
                self.total = page.total_results.or(self.total);
                match (&page.next_cursor, page.has_next_page) {
                    (Some(next), true) => self.cursor = Some(next.clone()),
                    _ => self.exhausted = true,
                }
                Some(PageOutcome::Fetched(page))
            }
            Err(error) => {
                match self
                    .client
                    .upstream
                    .skip_cursor(cursor.as_deref(), self.client.page_size, self.total)
                {
                    Some(next) => self.cursor = Some(next),
                    None => self.exhausted = true,
                }
                Some(PageOutcome::Failed {
                    page_index,
                    cursor,
                    error,
                })
            }
        }
    }
}
