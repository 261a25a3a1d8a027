//! Pure TripAdvisor GraphQL client.
//!
//! Fetches one page of an attraction listing and hands back the raw response
//! body. Decoding the listing is left to the caller so schema drift surfaces
//! as a parse error downstream instead of a transport failure here.
//!
//! Location search (typeahead) is decoded here, since callers only need the
//! id and coordinates of each geographic match.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tripadvisor_client::{ListingQuery, TripAdvisorClient};
//!
//! let client = TripAdvisorClient::new(
//!     "https://www.tripadvisor.com/data/graphql/ids",
//!     Duration::from_secs(30),
//! )?;
//!
//! let body = client
//!     .fetch_listing(&ListingQuery {
//!         geo_id: "60763".into(),
//!         category: "attractions".into(),
//!         offset: 0,
//!         page_size: 30,
//!     })
//!     .await?;
//! ```

pub mod error;
pub mod types;

pub use error::{ClientError, Result};
pub use types::{GraphQlRequest, ListingQuery, LocationCandidate, TypeaheadRequest};

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;

use types::TypeaheadEnvelope;

pub const DEFAULT_BASE_URL: &str = "https://www.tripadvisor.com/data/graphql/ids";

/// Persisted query id of the attraction listing.
pub const DEFAULT_LISTING_QUERY_ID: &str = "a8a8f1c9c1b9f1d2";

/// Persisted query id of the location typeahead.
pub const DEFAULT_TYPEAHEAD_QUERY_ID: &str = "84b17ed122fbdbd4";

const TYPEAHEAD_LIMIT: u32 = 10;

pub struct TripAdvisorClient {
    client: reqwest::Client,
    base_url: String,
    query_id: String,
    typeahead_query_id: String,
    headers: HeaderMap,
}

impl TripAdvisorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        Ok(Self {
            client,
            base_url: base_url.into(),
            query_id: DEFAULT_LISTING_QUERY_ID.to_string(),
            typeahead_query_id: DEFAULT_TYPEAHEAD_QUERY_ID.to_string(),
            headers,
        })
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn with_typeahead_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.typeahead_query_id = query_id.into();
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::Config(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the request body for one listing page.
    pub fn listing_body(&self, query: &ListingQuery) -> Vec<GraphQlRequest> {
        vec![GraphQlRequest::listing(&self.query_id, query)]
    }

    /// Fetch one listing page and return the raw body.
    pub async fn fetch_listing(&self, query: &ListingQuery) -> Result<String> {
        tracing::debug!(
            geo_id = %query.geo_id,
            category = %query.category,
            offset = query.offset,
            "Fetching listing page"
        );

        self.post(&self.listing_body(query)).await
    }

    pub fn typeahead_body(&self, text: &str) -> Vec<TypeaheadRequest> {
        vec![TypeaheadRequest::locations(
            &self.typeahead_query_id,
            text,
            TYPEAHEAD_LIMIT,
        )]
    }

    /// Search locations by name, e.g. "Lisbon, Portugal".
    ///
    /// Returns geographic matches in upstream ranking order.
    pub async fn search_locations(&self, text: &str) -> Result<Vec<LocationCandidate>> {
        tracing::debug!(query = text, "Searching locations");

        let body = self.post(&self.typeahead_body(text)).await?;
        decode_locations(&body)
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<String> {
        let resp = self
            .client
            .post(&self.base_url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(resp.headers());
            return Err(ClientError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.text().await?)
    }
}

fn decode_locations(body: &str) -> Result<Vec<LocationCandidate>> {
    let batch: Vec<TypeaheadEnvelope> =
        serde_json::from_str(body).map_err(|e| ClientError::Decode(e.to_string()))?;
    let first = batch
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::Decode("empty response batch".into()))?;
    Ok(first.into_candidates())
}

/// Retry-After in its delay-seconds form. HTTP dates are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
