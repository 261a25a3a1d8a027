//! Record parser: raw page payload to candidate records.
//!
//! Pure over the payload. Entries that cannot be decoded are skipped and
//! logged; a payload without the expected structure is a [`ParseError`] that
//! the caller counts and moves past.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::schema::{self, ActivityEntry, AddressField, RatingField, Scalar, TagsField};
use crate::error::ParseError;
use crate::types::page::RawPage;
use crate::types::record::{CandidateRecord, Location};

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Parse every decodable activity on the page.
pub fn parse(page: &RawPage) -> Result<Vec<CandidateRecord>, ParseError> {
    let activities = schema::activities(&page.payload)
        .ok_or_else(|| ParseError::Envelope("missing data.activities".into()))?;

    let items = match activities.get("items") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ParseError::Schema(format!(
                "items is {}, expected an array",
                type_name(other)
            )))
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        match serde_json::from_value::<ActivityEntry>(item.clone()) {
            Ok(entry) => records.push(candidate(page, entry)),
            Err(e) => {
                tracing::warn!(
                    target_index = page.target.index,
                    page = page.page_index,
                    position,
                    error = %e,
                    "Skipping undecodable activity entry"
                );
            }
        }
    }

    Ok(records)
}

fn candidate(page: &RawPage, entry: ActivityEntry) -> CandidateRecord {
    let target = &page.target;

    let (address, postal_code) = match entry.address {
        Some(AddressField::Text(text)) => (non_blank(Some(text)), None),
        Some(AddressField::Structured {
            street_address,
            postal_code,
        }) => (non_blank(street_address), non_blank(postal_code)),
        None => (None, None),
    };
    let latitude = entry.latitude.and_then(|v| v.as_f64());
    let longitude = entry.longitude.and_then(|v| v.as_f64());
    let location = (latitude.is_some() || longitude.is_some() || address.is_some() || postal_code.is_some())
        .then_some(Location {
            latitude,
            longitude,
            address,
            postal_code,
        });

    let (rating, rating_count) = match entry.rating {
        Some(RatingField::Value(value)) => (value.as_f64(), None),
        Some(RatingField::Detailed { value, count }) => {
            (value.and_then(|v| v.as_f64()), count.and_then(|c| c.as_f64()))
        }
        None => (None, None),
    };
    let review_count = entry
        .review_count
        .and_then(|c| c.as_f64())
        .or(rating_count)
        .filter(|c| *c >= 0.0)
        .map(|c| c as u32);

    CandidateRecord {
        source: page.source.clone(),
        external_id: entry.location_id.and_then(Scalar::into_text),
        title: entry.name.map(|n| n.trim().to_string()).unwrap_or_default(),
        description: entry.description,
        location,
        tags: entry.tags.map(split_tags).unwrap_or_default(),
        rating: rating.filter(|r| r.is_finite()).map(|r| r as f32),
        review_count,
        duration_minutes: entry.duration.as_deref().and_then(parse_duration_minutes),
        source_url: non_blank(entry.url),
        website: non_blank(entry.website),
        image_url: non_blank(entry.image),
        kind: non_blank(entry.kind),
        hours: entry.hours.filter(|h| !is_empty_json(h)).map(|h| h.to_string()),
        city: target.city.clone(),
        country: target.country.clone(),
        namespace: target.namespace.clone(),
        category: target.category.clone(),
    }
}

/// Convert duration text such as "1-2 hours" or "30 minutes" to minutes.
///
/// Takes the mean of the numbers in the text, scales hours to minutes and
/// rounds to the nearest 5. Text without numbers or a recognisable unit,
/// or a duration too large to represent, yields `None`.
pub fn parse_duration_minutes(text: &str) -> Option<u32> {
    let numbers: Vec<f64> = DIGITS
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect();
    if numbers.is_empty() {
        return None;
    }
    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;

    let lower = text.to_lowercase();
    let minutes = if lower.contains("hour") {
        mean * 60.0
    } else if lower.contains("min") {
        mean
    } else {
        return None;
    };

    let rounded = 5.0 * (minutes / 5.0).round();
    if !(0.0..=f64::from(u32::MAX)).contains(&rounded) {
        return None;
    }
    Some(rounded as u32)
}

/// Tags come as a bullet-separated string or as a list.
fn split_tags(tags: TagsField) -> Vec<String> {
    let raw: Vec<String> = match tags {
        TagsField::Text(text) => text.split('•').map(str::to_string).collect(),
        TagsField::List(list) => list.into_iter().flatten().collect(),
    };

    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
