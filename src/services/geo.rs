/// Great-circle distance between two coordinates in kilometers, using the
/// Haversine formula.
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_distances() {
        // Surat to Mumbai, roughly 230 km
        let d = distance_km(21.1702, 72.8311, 19.0760, 72.8777);
        assert!(d > 225.0 && d < 240.0, "got {}", d);

        // Connaught Place to Karol Bagh (Delhi), a few km
        let d = distance_km(28.6315, 77.2167, 28.6519, 77.1909);
        assert!(d > 2.0 && d < 5.0, "got {}", d);
    }

    #[test]
    fn zero_for_same_point() {
        let d = distance_km(21.1702, 72.8311, 21.1702, 72.8311);
        assert!(d < 0.001);
    }

    #[test]
    fn symmetric() {
        let a = distance_km(12.9716, 77.5946, 13.0827, 80.2707);
        let b = distance_km(13.0827, 80.2707, 12.9716, 77.5946);
        assert!((a - b).abs() < 1e-9);
    }
}
