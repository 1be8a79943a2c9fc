// src/geo.rs
use crate::types::Location;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres (haversine).
pub fn haversine_m(a: &Location, b: &Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = Location::new(12.9716, 77.5946);
        assert!(haversine_m(&p, &p).abs() < 1e-6);
    }

    #[test]
    fn test_one_degree_latitude() {
        let a = Location::new(0.0, 0.0);
        let b = Location::new(1.0, 0.0);
        let d = haversine_m(&a, &b);
        assert!((d - 111_195.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_bangalore_to_mysore() {
        let bangalore = Location::new(12.9716, 77.5946);
        let mysore = Location::new(12.2958, 76.6394);
        let km = haversine_m(&bangalore, &mysore) / 1000.0;
        assert!((125.0..130.0).contains(&km), "got {km}");
    }
}
