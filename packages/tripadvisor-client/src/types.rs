use serde::{Deserialize, Serialize};

/// One page of the attraction listing for a geo location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub geo_id: String,
    pub category: String,
    /// Result offset; the upstream pages by offset rather than page number.
    pub offset: u32,
    pub page_size: u32,
}

/// Body of a single persisted-query GraphQL request.
///
/// The endpoint accepts a batch, so requests are always sent as a
/// one-element array.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest {
    pub query: String,
    pub variables: ListingVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingVariables {
    pub request: ListingRequest,
    pub route: Route,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingRequest {
    #[serde(rename = "routeParameters")]
    pub route_parameters: RouteParameters,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub page: String,
    pub params: RouteParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteParameters {
    #[serde(rename = "geoId")]
    pub geo_id: String,
    pub category: String,
    /// Offset as a string, matching the upstream's route encoding.
    pub pagee: String,
}

impl GraphQlRequest {
    pub fn listing(query_id: &str, query: &ListingQuery) -> Self {
        let params = RouteParameters {
            geo_id: query.geo_id.clone(),
            category: query.category.clone(),
            pagee: query.offset.to_string(),
        };

        Self {
            query: query_id.to_string(),
            variables: ListingVariables {
                request: ListingRequest {
                    route_parameters: params.clone(),
                    page_size: query.page_size,
                },
                route: Route {
                    page: "Attractions".to_string(),
                    params,
                },
            },
        }
    }
}

/// Location search for a free-text place name such as "Lisbon, Portugal".
#[derive(Debug, Clone, Serialize)]
pub struct TypeaheadRequest {
    pub query: String,
    pub variables: TypeaheadVariables,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeaheadVariables {
    pub request: TypeaheadParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeaheadParams {
    pub query: String,
    pub limit: u32,
    #[serde(rename = "searchCenter")]
    pub search_center: Option<SearchCenter>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SearchCenter {
    pub latitude: f64,
    pub longitude: f64,
}

impl TypeaheadRequest {
    pub fn locations(query_id: &str, text: &str, limit: u32) -> Self {
        Self {
            query: query_id.to_string(),
            variables: TypeaheadVariables {
                request: TypeaheadParams {
                    query: text.to_string(),
                    limit,
                    search_center: None,
                },
            },
        }
    }
}

/// A geographic match returned by the typeahead search.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationCandidate {
    pub location_id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TypeaheadEnvelope {
    data: TypeaheadData,
}

#[derive(Debug, Deserialize)]
struct TypeaheadData {
    #[serde(rename = "Typeahead_autocomplete")]
    autocomplete: TypeaheadResults,
}

#[derive(Debug, Deserialize)]
struct TypeaheadResults {
    #[serde(default)]
    results: Vec<TypeaheadItem>,
}

#[derive(Debug, Deserialize)]
struct TypeaheadItem {
    #[serde(rename = "__typename")]
    typename: String,
    #[serde(rename = "locationId")]
    location_id: Option<serde_json::Value>,
    details: Option<TypeaheadDetails>,
}

#[derive(Debug, Deserialize)]
struct TypeaheadDetails {
    #[serde(rename = "localizedName")]
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl TypeaheadEnvelope {
    /// Location items in upstream order. Results without an id or
    /// coordinates are dropped.
    pub(crate) fn into_candidates(self) -> Vec<LocationCandidate> {
        self.data
            .autocomplete
            .results
            .into_iter()
            .filter(|item| item.typename == "Typeahead_LocationItem")
            .filter_map(|item| {
                let location_id = match item.location_id? {
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                    _ => return None,
                };
                let details = item.details?;
                Some(LocationCandidate {
                    location_id,
                    name: details.name,
                    latitude: details.latitude?,
                    longitude: details.longitude?,
                })
            })
            .collect()
    }
}
