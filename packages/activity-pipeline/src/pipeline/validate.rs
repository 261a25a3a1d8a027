//! Validator: the gate between parsed candidates and the deduplicator.

use crate::error::ValidationError;
use crate::types::record::{CandidateRecord, ValidRecord};

/// Accept a candidate with a non-blank description and a resolvable location.
///
/// The record passes through unchanged. Description is checked first, so a
/// candidate missing both is reported as [`ValidationError::MissingDescription`].
pub fn validate(candidate: CandidateRecord) -> Result<ValidRecord, ValidationError> {
    let has_description = candidate
        .description
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty());
    if !has_description {
        return Err(ValidationError::MissingDescription);
    }

    let has_location = candidate
        .location
        .as_ref()
        .is_some_and(|l| l.is_resolvable());
    if !has_location {
        return Err(ValidationError::MissingLocation);
    }

    Ok(ValidRecord::new_unchecked(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::Location;

    fn complete() -> CandidateRecord {
        CandidateRecord {
            source: "tripadvisor".into(),
            external_id: Some("1".into()),
            title: "Castle".into(),
            description: Some("Old castle on a hill.".into()),
            location: Some(Location::from_coordinates(38.71, -9.13)),
            tags: vec!["Sights".into()],
            city: "Lisbon".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_record_passes_unchanged() {
        let candidate = complete();
        let valid = validate(candidate.clone()).unwrap();
        assert_eq!(valid.into_inner(), candidate);
    }

    #[test]
    fn test_empty_description_is_rejected() {
        for description in [None, Some(""), Some("   \n")] {
            let mut candidate = complete();
            candidate.description = description.map(String::from);
            assert_eq!(validate(candidate), Err(ValidationError::MissingDescription));
        }
    }

    #[test]
    fn test_unresolvable_location_is_rejected() {
        for location in [
            None,
            Some(Location::default()),
            Some(Location::from_address(" ")),
            Some(Location::from_coordinates(0.0, 0.0)),
        ] {
            let mut candidate = complete();
            candidate.location = location;
            assert_eq!(validate(candidate), Err(ValidationError::MissingLocation));
        }
    }

    #[test]
    fn test_address_only_location_is_enough() {
        let mut candidate = complete();
        candidate.location = Some(Location::from_address("Castelo de S. Jorge"));
        assert!(validate(candidate).is_ok());
    }

    #[test]
    fn test_missing_both_reports_description() {
        let mut candidate = complete();
        candidate.description = None;
        candidate.location = None;
        assert_eq!(validate(candidate), Err(ValidationError::MissingDescription));
    }
}
