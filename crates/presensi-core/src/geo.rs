//! Great-circle distance between two positions.

use crate::types::{Coordinates, Geofence};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// School grounds used to seed the geofence on first startup.
pub const DEFAULT_CENTER_LATITUDE: f64 = -6.270_491_325_359_8;
pub const DEFAULT_CENTER_LONGITUDE: f64 = 106.961_072_613_592_52;
pub const DEFAULT_RADIUS_M: f64 = 15.0;

/// Default attendance area.
pub fn default_geofence() -> Geofence {
    Geofence {
        center: Coordinates {
            latitude: DEFAULT_CENTER_LATITUDE,
            longitude: DEFAULT_CENTER_LONGITUDE,
        },
        radius_m: DEFAULT_RADIUS_M,
    }
}

/// Haversine distance in meters. Inputs must already be range-checked.
pub fn haversine_m(a: &Coordinates, b: &Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Clamp guards sqrt(1 - h) against rounding just above 1.0 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Offset a position by `meters` due north. Used to build test positions.
#[cfg(test)]
pub(crate) fn north_of(origin: &Coordinates, meters: f64) -> Coordinates {
    let dlat = (meters / EARTH_RADIUS_M).to_degrees();
    Coordinates {
        latitude: origin.latitude + dlat,
        longitude: origin.longitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates { latitude, longitude }
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let p = at(-6.2705, 106.9611);
        assert_eq!(haversine_m(&p, &p), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = at(-6.2705, 106.9611);
        let b = at(-6.1754, 106.8272);
        let ab = haversine_m(&a, &b);
        let ba = haversine_m(&b, &a);
        assert!((ab - ba).abs() < 1e-6, "ab={ab} ba={ba}");
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // 2πR / 360 ≈ 111 194.93 m
        let d = haversine_m(&at(0.0, 0.0), &at(1.0, 0.0));
        assert!((d - 111_194.93).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_antipodal_points() {
        let d = haversine_m(&at(0.0, 0.0), &at(0.0, 180.0));
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!((d - half_circumference).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_north_of_helper_round_trips_distance() {
        let center = at(-6.2705, 106.9611);
        for meters in [10.0, 15.0, 200.0] {
            let p = north_of(&center, meters);
            assert!((haversine_m(&center, &p) - meters).abs() < 0.01);
        }
    }

    #[test]
    fn test_default_geofence_contains_center() {
        let fence = default_geofence();
        assert!(fence.contains(&fence.center));
        assert_eq!(fence.radius_m, 15.0);
    }
}
