//! Activity records as they move through parse, validate and dedup.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;
use crate::pipeline::validate::validate;

/// Where an activity takes place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
}

impl Location {
    pub fn from_coordinates(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Default::default()
        }
    }

    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Coordinates when both are present, finite, in range and not (0, 0).
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let (lat, lng) = (self.latitude?, self.longitude?);
        let in_range = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);

        (in_range && !(lat == 0.0 && lng == 0.0)).then_some((lat, lng))
    }

    /// Street address when it has any non-whitespace content.
    pub fn address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    pub fn is_resolvable(&self) -> bool {
        self.coordinates().is_some() || self.address().is_some()
    }
}

/// An activity as decoded from a page. May be structurally incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Upstream that produced the record
    pub source: String,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<Location>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub rating: Option<f32>,
    pub review_count: Option<u32>,
    pub duration_minutes: Option<u32>,
    pub source_url: Option<String>,
    pub website: Option<String>,
    pub image_url: Option<String>,
    /// Activity type as labelled upstream ("Museum", "Tour")
    pub kind: Option<String>,
    /// Opening hours, JSON text
    pub hours: Option<String>,
    pub city: String,
    pub country: String,
    pub namespace: String,
    pub category: String,
}

/// A candidate with a non-empty description and a resolvable location.
///
/// Only [`crate::pipeline::validate::validate`] constructs these, including
/// when one is read back from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CandidateRecord", try_from = "CandidateRecord")]
pub struct ValidRecord(CandidateRecord);

impl TryFrom<CandidateRecord> for ValidRecord {
    type Error = ValidationError;

    fn try_from(candidate: CandidateRecord) -> Result<Self, Self::Error> {
        validate(candidate)
    }
}

impl From<ValidRecord> for CandidateRecord {
    fn from(record: ValidRecord) -> Self {
        record.0
    }
}

impl ValidRecord {
    pub(crate) fn new_unchecked(record: CandidateRecord) -> Self {
        Self(record)
    }

    pub fn into_inner(self) -> CandidateRecord {
        self.0
    }

    pub fn description(&self) -> &str {
        self.0.description.as_deref().unwrap_or_default()
    }

    pub fn location(&self) -> &Location {
        static EMPTY: Location = Location {
            latitude: None,
            longitude: None,
            address: None,
            postal_code: None,
        };
        self.0.location.as_ref().unwrap_or(&EMPTY)
    }

    /// External id when present, otherwise a hash of title, city and place.
    pub fn identity_key(&self) -> IdentityKey {
        match self.0.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => IdentityKey::External {
                source: self.0.source.clone(),
                id: id.to_string(),
            },
            _ => IdentityKey::composite(&self.0.title, &self.0.city, self.location()),
        }
    }
}

impl Deref for ValidRecord {
    type Target = CandidateRecord;

    fn deref(&self) -> &CandidateRecord {
        &self.0
    }
}

/// Deduplication key of an activity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum IdentityKey {
    /// Upstream id, scoped by source so ids from different upstreams never collide
    External { source: String, id: String },

    /// Hex digest of normalized title, city and place
    Composite(String),
}

impl IdentityKey {
    pub fn composite(title: &str, city: &str, location: &Location) -> Self {
        let place = match location.coordinates() {
            Some((lat, lng)) => format!(
                "{},{}",
                (lat * 1000.0).round() as i64,
                (lng * 1000.0).round() as i64
            ),
            None => normalize(location.address().unwrap_or_default()),
        };

        let mut hasher = Sha256::new();
        hasher.update(normalize(title).as_bytes());
        hasher.update([0]);
        hasher.update(normalize(city).as_bytes());
        hasher.update([0]);
        hasher.update(place.as_bytes());

        IdentityKey::Composite(hex::encode(&hasher.finalize()[..16]))
    }
}

/// Lowercase, trim and collapse inner whitespace.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::External { source, id } => write!(f, "ext:{source}:{id}"),
            IdentityKey::Composite(digest) => write!(f, "cmp:{digest}"),
        }
    }
}

impl FromStr for IdentityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("ext:") {
            let (source, id) = rest
                .split_once(':')
                .ok_or_else(|| format!("external key without source: {s}"))?;
            return Ok(IdentityKey::External {
                source: source.to_string(),
                id: id.to_string(),
            });
        }
        if let Some(digest) = s.strip_prefix("cmp:") {
            return Ok(IdentityKey::Composite(digest.to_string()));
        }
        Err(format!("unrecognized identity key: {s}"))
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// The deduplicated record handed to the sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub key: IdentityKey,
    pub record: ValidRecord,
}

impl CanonicalRecord {
    /// Text sent to the embedding service: description, then tags.
    pub fn embedding_text(&self) -> String {
        let description = self.record.description().trim();
        if self.record.tags.is_empty() {
            return description.to_string();
        }
        format!("{}\n{}", description, self.record.tags.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(external_id: Option<&str>, title: &str, city: &str) -> ValidRecord {
        ValidRecord::new_unchecked(CandidateRecord {
            source: "tripadvisor".into(),
            external_id: external_id.map(String::from),
            title: title.into(),
            description: Some("A walk along the river".into()),
            location: Some(Location::from_coordinates(44.9537, -93.0900)),
            city: city.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_deserializing_runs_validation() {
        let stored = serde_json::to_value(record(Some("1"), "Tour", "St Paul")).unwrap();
        let back: ValidRecord = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(back.external_id.as_deref(), Some("1"));

        let mut blank = stored.clone();
        blank["description"] = serde_json::json!("   ");
        assert!(serde_json::from_value::<ValidRecord>(blank).is_err());

        let mut nowhere = stored;
        nowhere["location"] = serde_json::Value::Null;
        assert!(serde_json::from_value::<ValidRecord>(nowhere).is_err());
    }

    #[test]
    fn test_external_id_is_preferred() {
        let key = record(Some(" 123 "), "Tour", "St Paul").identity_key();
        assert_eq!(
            key,
            IdentityKey::External {
                source: "tripadvisor".into(),
                id: "123".into()
            }
        );
        assert_eq!(key.to_string(), "ext:tripadvisor:123");
    }

    #[test]
    fn test_composite_key_normalizes_title_and_city() {
        let a = record(None, "  River   Walk ", "St Paul").identity_key();
        let b = record(Some(""), "river walk", "ST PAUL").identity_key();
        assert_eq!(a, b);
        assert!(matches!(a, IdentityKey::Composite(_)));

        let c = record(None, "River Walk", "Minneapolis").identity_key();
        assert_ne!(a, c);
    }

    #[test]
    fn test_composite_key_rounds_coordinates() {
        let mut near = record(None, "River Walk", "St Paul").into_inner();
        near.location = Some(Location::from_coordinates(44.95371, -93.09004));
        let near = ValidRecord::new_unchecked(near);

        assert_eq!(
            near.identity_key(),
            record(None, "River Walk", "St Paul").identity_key()
        );
    }

    #[test]
    fn test_identity_key_string_form_parses_back() {
        for key in [
            IdentityKey::External {
                source: "tripadvisor".into(),
                id: "a:b".into(),
            },
            IdentityKey::Composite("00ff".into()),
        ] {
            let parsed: IdentityKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
        assert!("nope".parse::<IdentityKey>().is_err());
    }

    #[test]
    fn test_location_resolvability() {
        assert!(Location::from_coordinates(10.0, 20.0).is_resolvable());
        assert!(!Location::from_coordinates(0.0, 0.0).is_resolvable());
        assert!(!Location::from_coordinates(95.0, 20.0).is_resolvable());
        assert!(!Location::from_coordinates(f64::NAN, 20.0).is_resolvable());
        assert!(Location::from_address("1 Main St").is_resolvable());
        assert!(!Location::from_address("   ").is_resolvable());
        assert!(!Location::default().is_resolvable());
    }

    #[test]
    fn test_embedding_text_joins_tags() {
        let mut inner = record(Some("1"), "Tour", "St Paul").into_inner();
        inner.tags = vec!["Walking Tours".into(), "History".into()];
        let canonical = CanonicalRecord {
            key: IdentityKey::Composite("x".into()),
            record: ValidRecord::new_unchecked(inner),
        };

        assert_eq!(
            canonical.embedding_text(),
            "A walk along the river\nWalking Tours, History"
        );
    }
}
