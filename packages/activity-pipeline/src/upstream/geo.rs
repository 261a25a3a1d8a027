//! Great-circle distance for matching upstream locations to catalogue cities.

use std::f64::consts::PI;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let to_rad = |deg: f64| deg * PI / 180.0;

    let dlat = to_rad(lat2 - lat1);
    let dlng = to_rad(lng2 - lng1);

    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_distances() {
        assert_eq!(haversine_km(38.72, -9.14, 38.72, -9.14), 0.0);

        // Lisbon to Porto is roughly 274 km
        let d = haversine_km(38.7223, -9.1393, 41.1579, -8.6291);
        assert!((d - 274.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_symmetric() {
        let there = haversine_km(44.95, -93.09, 44.98, -93.27);
        let back = haversine_km(44.98, -93.27, 44.95, -93.09);
        assert!((there - back).abs() < 1e-9);
    }
}
