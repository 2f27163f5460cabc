pub mod index;

use crate::error::AppError;
use crate::models::courier::Coordinate;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Latitude bound of the web-mercator projection geosets index on.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn validate_coordinate(coord: &Coordinate) -> Result<(), AppError> {
    if !coord.longitude.is_finite() || !(-180.0..=180.0).contains(&coord.longitude) {
        return Err(AppError::Validation(format!(
            "longitude {} out of range [-180, 180]",
            coord.longitude
        )));
    }

    if !coord.latitude.is_finite() || !(-MAX_LATITUDE..=MAX_LATITUDE).contains(&coord.latitude) {
        return Err(AppError::Validation(format!(
            "latitude {} out of range [-{MAX_LATITUDE}, {MAX_LATITUDE}]",
            coord.latitude
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, validate_coordinate};
    use crate::models::courier::Coordinate;

    #[test]
    fn zero_distance_for_same_point() {
        let p = Coordinate::new(106.7009, 10.7769);
        assert!(haversine_km(&p, &p) < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = Coordinate::new(-0.1278, 51.5074);
        let paris = Coordinate::new(2.3522, 48.8566);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn rejects_coordinates_outside_index_bounds() {
        assert!(validate_coordinate(&Coordinate::new(181.0, 10.0)).is_err());
        assert!(validate_coordinate(&Coordinate::new(10.0, 86.0)).is_err());
        assert!(validate_coordinate(&Coordinate::new(f64::NAN, 10.0)).is_err());
        assert!(validate_coordinate(&Coordinate::new(-180.0, -85.0)).is_ok());
    }
}
