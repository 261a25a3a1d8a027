//! Deduplicator.
//!
//! Holds the run's identity-key map. It is owned by the collector task and
//! never shared, which is what keeps "at most one canonical record per key"
//! true while many workers produce records concurrently.

use std::collections::HashMap;

use crate::types::record::{CanonicalRecord, IdentityKey, ValidRecord};

/// Result of ingesting one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// First record seen for its key
    Emitted(CanonicalRecord),

    /// Key already seen; the record contributes nothing.
    /// `first_city` is `None` for keys sunk by an earlier run.
    Suppressed {
        key: IdentityKey,
        first_city: Option<String>,
    },
}

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashMap<IdentityKey, Option<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with keys that earlier runs already sank.
    pub fn with_seen_keys(keys: impl IntoIterator<Item = IdentityKey>) -> Self {
        Self {
            seen: keys.into_iter().map(|k| (k, None)).collect(),
        }
    }

    pub fn ingest(&mut self, record: ValidRecord) -> Ingested {
        let key = record.identity_key();

        if let Some(first_city) = self.seen.get(&key) {
            return Ingested::Suppressed {
                key,
                first_city: first_city.clone(),
            };
        }

        self.seen.insert(key.clone(), Some(record.city.clone()));
        Ingested::Emitted(CanonicalRecord { key, record })
    }

    /// Number of distinct keys seen, seeded keys included.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.seen.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::pipeline::validate::validate;
    use crate::types::record::{CandidateRecord, Location};

    fn record(external_id: Option<&str>, title: &str, city: &str) -> ValidRecord {
        validate(CandidateRecord {
            source: "tripadvisor".into(),
            external_id: external_id.map(String::from),
            title: title.into(),
            description: Some(format!("About {title}")),
            location: Some(Location::from_coordinates(45.0, -93.0)),
            city: city.into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_same_external_id_across_cities_keeps_first_city() {
        let mut dedup = Deduplicator::new();

        let first = dedup.ingest(record(Some("77"), "Mill Ruins", "Minneapolis"));
        let second = dedup.ingest(record(Some("77"), "Mill Ruins Park", "St Paul"));

        let Ingested::Emitted(canonical) = first else {
            panic!("first record should be emitted");
        };
        assert_eq!(canonical.record.city, "Minneapolis");
        assert_eq!(canonical.record.title, "Mill Ruins");
        assert_eq!(
            second,
            Ingested::Suppressed {
                key: canonical.key.clone(),
                first_city: Some("Minneapolis".into())
            }
        );
    }

    #[test]
    fn test_seeded_keys_are_suppressed() {
        let seeded = record(Some("1"), "Castle", "Lisbon");
        let mut dedup = Deduplicator::with_seen_keys([seeded.identity_key()]);

        assert!(matches!(
            dedup.ingest(seeded),
            Ingested::Suppressed { first_city: None, .. }
        ));
        assert_eq!(dedup.len(), 1);
    }

    fn arb_record() -> impl Strategy<Value = ValidRecord> {
        (
            proptest::option::of(0u8..6),
            prop::sample::select(vec!["Castle", "castle ", "Museum", "Park"]),
            prop::sample::select(vec!["Lisbon", "Porto"]),
        )
            .prop_map(|(id, title, city)| {
                let id = id.map(|i| i.to_string());
                record(id.as_deref(), title, city)
            })
    }

    proptest! {
        #[test]
        fn emitted_keys_are_unique(records in prop::collection::vec(arb_record(), 0..40)) {
            let mut dedup = Deduplicator::new();
            let mut keys = HashSet::new();
            let mut emitted = 0usize;

            for r in records.iter().cloned() {
                if let Ingested::Emitted(c) = dedup.ingest(r) {
                    prop_assert!(keys.insert(c.key));
                    emitted += 1;
                }
            }

            let distinct: HashSet<_> = records.iter().map(|r| r.identity_key()).collect();
            prop_assert_eq!(emitted, distinct.len());
            prop_assert_eq!(dedup.len(), distinct.len());
        }

        #[test]
        fn reingesting_never_emits(records in prop::collection::vec(arb_record(), 0..40)) {
            let mut dedup = Deduplicator::new();
            for r in records.iter().cloned() {
                dedup.ingest(r);
            }
            let before = dedup.len();

            for r in records {
                let outcome = dedup.ingest(r);
                prop_assert!(matches!(outcome, Ingested::Suppressed { .. }), "re-ingest emitted");
            }
            prop_assert_eq!(dedup.len(), before);
        }
    }
}
