//! Cities and the crawl targets derived from them.

use serde::{Deserialize, Serialize};

/// A city from the catalogue file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    #[serde(alias = "city")]
    pub name: String,

    #[serde(default)]
    pub state: Option<String>,

    pub country: String,

    #[serde(alias = "lat", default)]
    pub latitude: Option<f64>,

    #[serde(alias = "lng", default)]
    pub longitude: Option<f64>,

    /// Vector-store namespace for this city's records.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Upstream location id. When absent it is looked up by name and
    /// checked against `latitude`/`longitude`.
    #[serde(default, alias = "geoId")]
    pub geo_id: Option<String>,
}

impl City {
    pub fn new(name: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: None,
            country: country.into(),
            latitude: None,
            longitude: None,
            namespace: None,
            geo_id: None,
        }
    }

    pub fn with_geo_id(mut self, geo_id: impl Into<String>) -> Self {
        self.geo_id = Some(geo_id.into());
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Configured namespace, or a slug of "name-state-country".
    pub fn namespace(&self) -> String {
        if let Some(ns) = self.namespace.as_deref().filter(|ns| !ns.trim().is_empty()) {
            return ns.trim().to_string();
        }

        let mut parts = vec![self.name.as_str()];
        if let Some(state) = self.state.as_deref() {
            parts.push(state);
        }
        parts.push(self.country.as_str());

        slugify(&parts.join(" "))
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// A (city, category) pair driving one crawl sequence.
///
/// `index` is the target's position in the enumeration order and is what
/// checkpoints and failure reports refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub index: usize,
    pub city: String,
    pub country: String,
    pub namespace: String,
    pub geo_id: Option<String>,
    /// Catalogue coordinates of the city
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub category: String,
    /// Cursor of the first page to fetch. `None` starts at the beginning.
    pub cursor: Option<String>,
}

impl CrawlTarget {
    pub fn new(index: usize, city: &City, category: impl Into<String>) -> Self {
        Self {
            index,
            city: city.name.clone(),
            country: city.country.clone(),
            namespace: city.namespace(),
            geo_id: city.geo_id.clone(),
            latitude: city.latitude,
            longitude: city.longitude,
            category: category.into(),
            cursor: None,
        }
    }

    /// Restart this target from a persisted cursor.
    pub fn resume_from(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Place name for location search: "city, country".
    pub fn place(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }

    /// Short label for logs: "city/category".
    pub fn label(&self) -> String {
        format!("{}/{}", self.city, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_falls_back_to_slug() {
        let city = City::new("St. Paul", "United States").with_state("MN");
        assert_eq!(city.namespace(), "st-paul-mn-united-states");

        let city = city.with_namespace("stpaul");
        assert_eq!(city.namespace(), "stpaul");
    }

    #[test]
    fn test_city_catalogue_aliases() {
        let city: City = serde_json::from_str(
            r#"{"city":"Lisbon","country":"Portugal","lat":38.72,"lng":-9.14,"geo_id":"189158","processed":false}"#,
        )
        .unwrap();

        assert_eq!(city.name, "Lisbon");
        assert_eq!(city.latitude, Some(38.72));
        assert_eq!(city.geo_id.as_deref(), Some("189158"));
    }
}
