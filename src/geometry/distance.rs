//! Great-circle distance on a spherical Earth.

use super::LatLng;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (haversine formula).
#[must_use]
pub fn haversine_meters(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    // Rounding can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Point reached by travelling `distance_meters` from `origin` along the
/// initial bearing `bearing_degrees` (clockwise from north).
#[must_use]
pub fn destination(origin: LatLng, bearing_degrees: f64, distance_meters: f64) -> LatLng {
    let delta = distance_meters / EARTH_RADIUS_METERS;
    let theta = bearing_degrees.to_radians();
    let phi1 = origin.latitude.to_radians();
    let lambda1 = origin.longitude.to_radians();

    let sin_phi2 = phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
    let phi2 = sin_phi2.clamp(-1.0, 1.0).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * sin_phi2);

    // Normalize longitude to [-180, 180).
    let longitude = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;

    LatLng {
        latitude: phi2.to_degrees(),
        longitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        let p = LatLng::new(19.4326, -99.1332);
        assert!(haversine_meters(p, p).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111km() {
        let d = haversine_meters(LatLng::new(0.0, 0.0), LatLng::new(1.0, 0.0));
        assert!((d - 111_194.9).abs() < 1.0, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let a = LatLng::new(19.4326, -99.1332);
        let b = LatLng::new(20.6597, -103.3496);
        assert!((haversine_meters(a, b) - haversine_meters(b, a)).abs() < 1e-6);
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let d = haversine_meters(LatLng::new(0.0, 0.0), LatLng::new(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
    }

    #[test]
    fn destination_round_trips_through_haversine() {
        let origin = LatLng::new(19.4326, -99.1332);
        for &distance in &[10.0, 500.0, 2_000.0, 50_000.0] {
            for &bearing in &[0.0, 45.0, 137.0, 270.0] {
                let p = destination(origin, bearing, distance);
                let d = haversine_meters(origin, p);
                assert!((d - distance).abs() < 1e-3, "bearing={bearing} distance={distance} got={d}");
            }
        }
    }
}
