//! Upstream listing schema, version 1.
//!
//! ```json
//! {"data": {"activities": {
//!     "items": [{"locationId": 123, "name": "...", ...}],
//!     "pageInfo": {"nextCursor": "30", "hasNextPage": true, "totalResults": 412}
//! }}}
//! ```
//!
//! The upstream may also answer with a one-element batch array wrapping that
//! object. Unknown fields are ignored everywhere and every item field is
//! optional.

use serde::Deserialize;
use serde_json::Value;

/// Pagination metadata of a decoded page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
    pub total_results: Option<u64>,
}

/// Decode the response body and extract its pagination metadata.
///
/// Fails when the body is not JSON or lacks `data.activities`.
pub fn decode_envelope(body: &str) -> Result<(Value, PageInfo), String> {
    let mut value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;

    if let Value::Array(batch) = &mut value {
        if batch.is_empty() {
            return Err("empty response batch".into());
        }
        value = batch.swap_remove(0);
    }

    let activities = activities(&value).ok_or("missing data.activities")?;
    if !activities.is_object() {
        return Err("data.activities is not an object".into());
    }

    let raw: RawPageInfo = match activities.get("pageInfo") {
        Some(info) if !info.is_null() => {
            serde_json::from_value(info.clone()).map_err(|e| format!("invalid pageInfo: {e}"))?
        }
        _ => RawPageInfo::default(),
    };

    let next_cursor = raw
        .next_cursor
        .and_then(Scalar::into_text)
        .filter(|c| !c.trim().is_empty());
    let has_next_page = raw.has_next_page.unwrap_or(next_cursor.is_some()) && next_cursor.is_some();

    let info = PageInfo {
        next_cursor: if has_next_page { next_cursor } else { None },
        has_next_page,
        total_results: raw.total_results.and_then(|t| t.as_f64()).map(|t| t.max(0.0) as u64),
    };

    Ok((value, info))
}

/// The `data.activities` object of an already unwrapped payload.
pub fn activities(payload: &Value) -> Option<&Value> {
    payload.get("data")?.get("activities")
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPageInfo {
    #[serde(default)]
    next_cursor: Option<Scalar>,
    #[serde(default)]
    has_next_page: Option<bool>,
    #[serde(default)]
    total_results: Option<Scalar>,
}

/// A value the upstream sends as a number or as a string, inconsistently.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.trim().replace(',', "").parse().ok(),
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) if f.is_finite() && f.fract() == 0.0 => Some((f as i64).to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddressField {
    Text(String),
    #[serde(rename_all = "camelCase")]
    Structured {
        #[serde(default)]
        street_address: Option<String>,
        #[serde(default)]
        postal_code: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsField {
    /// Bullet-separated: "Museums • History Museums"
    Text(String),
    List(Vec<Option<String>>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RatingField {
    Value(Scalar),
    Detailed {
        #[serde(default, alias = "ratingValue")]
        value: Option<Scalar>,
        #[serde(default, alias = "reviewCount")]
        count: Option<Scalar>,
    },
}

/// One entry of `data.activities.items`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    #[serde(default, alias = "id")]
    pub location_id: Option<Scalar>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub latitude: Option<Scalar>,
    #[serde(default)]
    pub longitude: Option<Scalar>,
    #[serde(default)]
    pub address: Option<AddressField>,
    #[serde(default)]
    pub tags: Option<TagsField>,
    #[serde(default)]
    pub rating: Option<RatingField>,
    #[serde(default)]
    pub review_count: Option<Scalar>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "imageUrl")]
    pub image: Option<String>,
    #[serde(default)]
    pub hours: Option<Value>,
}
