//! TripAdvisor upstream.
//!
//! The listing endpoint pages by result offset, so cursors are decimal
//! offsets and a failed page can be stepped over.
//!
//! Cities without a geo id in the catalogue are looked up by name once per
//! run. The first location match within [`MAX_MATCH_DISTANCE_KM`] of the
//! catalogue coordinates is used for every category of that city.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tripadvisor_client::{ClientError, ListingQuery, LocationCandidate, TripAdvisorClient};

use super::geo::haversine_km;
use crate::error::{FetchError, FetchResult, PermanentKind, TransientKind};
use crate::traits::upstream::Upstream;
use crate::types::target::CrawlTarget;

/// Farthest a location match may lie from the catalogue coordinates.
pub const MAX_MATCH_DISTANCE_KM: f64 = 50.0;

pub struct TripAdvisorUpstream {
    client: TripAdvisorClient,
    /// Lookups by namespace; `None` when no match was close enough
    geo_ids: RwLock<HashMap<String, Option<String>>>,
}

impl TripAdvisorUpstream {
    pub fn new(client: TripAdvisorClient) -> Self {
        Self {
            client,
            geo_ids: RwLock::new(HashMap::new()),
        }
    }

    async fn geo_id(&self, target: &CrawlTarget) -> FetchResult<String> {
        if let Some(geo_id) = target.geo_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(geo_id.trim().to_string());
        }

        let (Some(lat), Some(lng)) = (target.latitude, target.longitude) else {
            return Err(invalid_target(format!(
                "{} has neither a geo id nor coordinates",
                target.city
            )));
        };

        let cached = self
            .geo_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target.namespace)
            .cloned();
        let resolved = match cached {
            Some(resolved) => resolved,
            None => {
                let candidates = self
                    .client
                    .search_locations(&target.place())
                    .await
                    .map_err(classify)?;
                let resolved = first_within(&candidates, lat, lng, MAX_MATCH_DISTANCE_KM)
                    .map(|c| c.location_id.clone());

                match &resolved {
                    Some(geo_id) => tracing::info!(city = %target.city, geo_id = %geo_id, "Resolved geo id"),
                    None => tracing::warn!(
                        city = %target.city,
                        candidates = candidates.len(),
                        "No location match near catalogue coordinates"
                    ),
                }
                self.geo_ids
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(target.namespace.clone(), resolved.clone());
                resolved
            }
        };

        resolved.ok_or_else(|| {
            invalid_target(format!(
                "no location within {MAX_MATCH_DISTANCE_KM} km of {}",
                target.city
            ))
        })
    }
}

/// First candidate, in upstream order, strictly closer than `max_km`.
fn first_within(
    candidates: &[LocationCandidate],
    lat: f64,
    lng: f64,
    max_km: f64,
) -> Option<&LocationCandidate> {
    candidates
        .iter()
        .find(|c| haversine_km(lat, lng, c.latitude, c.longitude) < max_km)
}

fn invalid_target(reason: String) -> FetchError {
    FetchError::Permanent(PermanentKind::InvalidTarget(reason))
}

fn parse_offset(cursor: Option<&str>) -> Result<u32, FetchError> {
    match cursor {
        None => Ok(0),
        Some(c) => c.trim().parse().map_err(|_| {
            FetchError::Permanent(PermanentKind::InvalidTarget(format!("non-numeric cursor {c:?}")))
        }),
    }
}

fn classify(err: ClientError) -> FetchError {
    match err {
        ClientError::Timeout => FetchError::Transient(TransientKind::Timeout),
        ClientError::RateLimited { retry_after } => {
            FetchError::Transient(TransientKind::RateLimited { retry_after })
        }
        ClientError::Network(msg) => FetchError::Transient(TransientKind::Network(msg)),
        ClientError::Api { status, .. } if status >= 500 || status == 408 => {
            FetchError::Transient(TransientKind::ServerError { status })
        }
        ClientError::Api { status, .. } => FetchError::Permanent(PermanentKind::ClientError { status }),
        ClientError::Config(msg) => FetchError::Permanent(PermanentKind::InvalidTarget(msg)),
        ClientError::Decode(msg) => FetchError::Permanent(PermanentKind::MalformedEnvelope(msg)),
    }
}

#[async_trait]
impl Upstream for TripAdvisorUpstream {
    async fn request_page(
        &self,
        target: &CrawlTarget,
        cursor: Option<&str>,
        page_size: u32,
    ) -> FetchResult<String> {
        let query = ListingQuery {
            geo_id: self.geo_id(target).await?,
            category: target.category.clone(),
            offset: parse_offset(cursor)?,
            page_size,
        };

        self.client.fetch_listing(&query).await.map_err(classify)
    }

    fn skip_cursor(&self, cursor: Option<&str>, page_size: u32, total: Option<u64>) -> Option<String> {
        let next = u64::from(parse_offset(cursor).ok()?) + u64::from(page_size);
        match total {
            Some(total) if next >= total => None,
            _ => Some(next.to_string()),
        }
    }

    fn name(&self) -> &str {
        "tripadvisor"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::target::City;

    fn upstream() -> TripAdvisorUpstream {
        let client = TripAdvisorClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        TripAdvisorUpstream::new(client)
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            classify(ClientError::Api {
                status: 503,
                message: String::new()
            }),
            FetchError::Transient(TransientKind::ServerError { status: 503 })
        );
        assert_eq!(
            classify(ClientError::Api {
                status: 404,
                message: String::new()
            }),
            FetchError::Permanent(PermanentKind::ClientError { status: 404 })
        );
        assert!(classify(ClientError::RateLimited {
            retry_after: Some(Duration::from_secs(3))
        })
        .is_transient());
    }

    #[test]
    fn test_skip_cursor_steps_by_page_size() {
        let upstream = upstream();
        assert_eq!(upstream.skip_cursor(None, 30, None).as_deref(), Some("30"));
        assert_eq!(upstream.skip_cursor(Some("30"), 30, Some(100)).as_deref(), Some("60"));
        assert_eq!(upstream.skip_cursor(Some("90"), 30, Some(100)), None);
    }

    fn candidate(id: &str, latitude: f64, longitude: f64) -> LocationCandidate {
        LocationCandidate {
            location_id: id.into(),
            name: None,
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_first_match_in_range_wins() {
        // Lisbon, Maine ranks first but is an ocean away
        let candidates = vec![
            candidate("31459", 44.03, -70.10),
            candidate("189158", 38.72, -9.14),
            candidate("189159", 38.70, -9.40),
        ];

        let found = first_within(&candidates, 38.7223, -9.1393, MAX_MATCH_DISTANCE_KM).unwrap();
        assert_eq!(found.location_id, "189158");
    }

    #[test]
    fn test_out_of_range_candidates_are_rejected() {
        // Porto is about 274 km from Lisbon
        let candidates = vec![candidate("189180", 41.1579, -8.6291)];
        assert!(first_within(&candidates, 38.7223, -9.1393, MAX_MATCH_DISTANCE_KM).is_none());
        assert!(first_within(&[], 38.7223, -9.1393, MAX_MATCH_DISTANCE_KM).is_none());
    }

    #[tokio::test]
    async fn test_catalogue_geo_id_skips_lookup() {
        let upstream = upstream();
        let city = City::new("Lisbon", "Portugal").with_geo_id(" 189158 ");
        let target = CrawlTarget::new(0, &city, "attractions");
        assert_eq!(upstream.geo_id(&target).await.unwrap(), "189158");
    }

    #[tokio::test]
    async fn test_cached_miss_fails_without_lookup() {
        let upstream = upstream();
        let city = City::new("Atlantis", "Nowhere").with_coordinates(31.0, -24.0);
        let target = CrawlTarget::new(0, &city, "attractions");
        upstream
            .geo_ids
            .write()
            .unwrap()
            .insert(target.namespace.clone(), None);

        // The client points at a closed port, so a lookup would be transient
        let err = upstream.geo_id(&target).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(PermanentKind::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_cached_hit_is_reused() {
        let upstream = upstream();
        let city = City::new("Lisbon", "Portugal").with_coordinates(38.72, -9.14);
        let target = CrawlTarget::new(0, &city, "attractions");
        upstream
            .geo_ids
            .write()
            .unwrap()
            .insert(target.namespace.clone(), Some("189158".into()));

        assert_eq!(upstream.geo_id(&target).await.unwrap(), "189158");
    }

    #[tokio::test]
    async fn test_missing_geo_id_and_coordinates_is_permanent() {
        let target = CrawlTarget::new(0, &City::new("Atlantis", "Nowhere"), "attractions");
        let err = upstream().request_page(&target, None, 30).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(PermanentKind::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let upstream = upstream();
        let city = City::new("Lisbon", "Portugal").with_coordinates(38.72, -9.14);
        let target = CrawlTarget::new(0, &city, "attractions");

        let err = upstream.geo_id(&target).await.unwrap_err();
        assert!(err.is_transient());
        assert!(upstream.geo_ids.read().unwrap().is_empty());
    }
}
