//! Upstream content source.

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::types::target::CrawlTarget;

/// A paginated source of activity listings.
///
/// Implementations perform exactly one request per call and classify the
/// outcome. Retries, admission control and timeouts belong to
/// [`crate::pipeline::fetch::FetchClient`].
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Request one page for `target`, starting at `cursor`, returning the raw body.
    async fn request_page(
        &self,
        target: &CrawlTarget,
        cursor: Option<&str>,
        page_size: u32,
    ) -> FetchResult<String>;

    /// Cursor of the page after `cursor`, for stepping over a page that
    /// could not be fetched. Only offset-style upstreams can do this.
    fn skip_cursor(&self, _cursor: Option<&str>, _page_size: u32, _total: Option<u64>) -> Option<String> {
        None
    }

    /// Name recorded as the source of parsed records.
    fn name(&self) -> &str;
}
