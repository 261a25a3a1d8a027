//! Target enumeration.
//!
//! Targets are the cross product of the city catalogue and the configured
//! categories, in city-major order. The order depends only on the inputs, so a
//! target's index identifies it across runs.

use std::path::Path;

use crate::error::ConfigError;
use crate::types::target::{City, CrawlTarget};

#[derive(Debug, Clone)]
pub struct TargetEnumerator {
    cities: Vec<City>,
    categories: Vec<String>,
}

impl TargetEnumerator {
    pub fn new(cities: Vec<City>, categories: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let categories = categories
            .into_iter()
            .map(Into::into)
            .map(|c: String| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        Self { cities, categories }
    }

    pub fn len(&self) -> usize {
        self.cities.len() * self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The target at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<CrawlTarget> {
        if self.categories.is_empty() {
            return None;
        }
        let city = self.cities.get(index / self.categories.len())?;
        let category = &self.categories[index % self.categories.len()];
        Some(CrawlTarget::new(index, city, category.as_str()))
    }

    /// All targets from the beginning.
    pub fn enumerate(&self) -> Targets<'_> {
        self.enumerate_from(0)
    }

    /// Targets from `start` onwards, for restarting a crawl at a known index.
    pub fn enumerate_from(&self, start: usize) -> Targets<'_> {
        Targets {
            enumerator: self,
            next: start,
        }
    }
}

/// Lazy iterator over targets.
pub struct Targets<'a> {
    enumerator: &'a TargetEnumerator,
    next: usize,
}

impl Iterator for Targets<'_> {
    type Item = CrawlTarget;

    fn next(&mut self) -> Option<CrawlTarget> {
        let target = self.enumerator.get(self.next)?;
        self.next += 1;
        Some(target)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.enumerator.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Targets<'_> {}

/// Read a city catalogue JSON file.
pub async fn load_catalogue(path: impl AsRef<Path>) -> Result<Vec<City>, ConfigError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ConfigError::Catalogue {
            path: path.display().to_string(),
            source,
        })?;

    let cities: Vec<City> = serde_json::from_slice(&bytes)?;
    tracing::info!(path = %path.display(), cities = cities.len(), "Loaded city catalogue");
    Ok(cities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enumerator() -> TargetEnumerator {
        TargetEnumerator::new(
            vec![
                City::new("Lisbon", "Portugal"),
                City::new("Porto", "Portugal"),
                City::new("Faro", "Portugal"),
            ],
            ["attractions", "tours"],
        )
    }

    #[test]
    fn test_city_major_order() {
        let labels: Vec<_> = enumerator().enumerate().map(|t| t.label()).collect();
        assert_eq!(
            labels,
            vec![
                "Lisbon/attractions",
                "Lisbon/tours",
                "Porto/attractions",
                "Porto/tours",
                "Faro/attractions",
                "Faro/tours",
            ]
        );
    }

    #[test]
    fn test_enumeration_is_stable_and_restartable() {
        let e = enumerator();
        let first: Vec<_> = e.enumerate().collect();
        let second: Vec<_> = e.enumerate().collect();
        assert_eq!(first, second);

        let tail: Vec<_> = e.enumerate_from(3).collect();
        assert_eq!(tail, first[3..].to_vec());
        assert_eq!(e.enumerate_from(3).len(), 3);

        for (i, target) in first.iter().enumerate() {
            assert_eq!(target.index, i);
            assert_eq!(e.get(i).as_ref(), Some(target));
        }
        assert!(e.get(6).is_none());
    }

    #[test]
    fn test_blank_categories_are_dropped() {
        let e = TargetEnumerator::new(vec![City::new("Lisbon", "Portugal")], ["", "  "]);
        assert!(e.is_empty());
        assert_eq!(e.enumerate().count(), 0);
    }

    #[tokio::test]
    async fn test_load_catalogue_reports_missing_file() {
        let err = load_catalogue("/nonexistent/cities.json").await.unwrap_err();
        assert!(matches!(err, ConfigError::Catalogue { .. }));
    }
}
