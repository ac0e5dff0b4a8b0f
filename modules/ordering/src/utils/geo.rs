const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both coordinates present, or nothing.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        Some(Self::new(latitude?, longitude?))
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        self.distance_meters(other) / 1000.0
    }

    /// Parse the `"lat,lng"` form partner apps send.
    pub fn parse_pair(raw: &str) -> Option<Self> {
        let (lat, lng) = raw.split_once(',')?;
        let point = Self::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
        point.is_valid().then_some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_known_points() {
        // Connaught Place to India Gate, roughly 2.4 km.
        let a = GeoPoint::new(28.6315, 77.2167);
        let b = GeoPoint::new(28.6129, 77.2295);
        let km = a.distance_km(&b);
        assert!((2.2..2.6).contains(&km), "{km}");
        assert_eq!(a.distance_meters(&a), 0.0);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
    }

    #[test]
    fn parses_lat_lng_pairs() {
        assert_eq!(
            GeoPoint::parse_pair("12.97, 77.59"),
            Some(GeoPoint::new(12.97, 77.59))
        );
        assert_eq!(GeoPoint::parse_pair("12.97"), None);
        assert_eq!(GeoPoint::parse_pair("120,10"), None);
        assert_eq!(GeoPoint::parse_pair("a,b"), None);
    }

    #[test]
    fn partial_coordinates_are_absent() {
        assert_eq!(GeoPoint::from_parts(Some(1.0), None), None);
        assert_eq!(
            GeoPoint::from_parts(Some(1.0), Some(2.0)),
            Some(GeoPoint::new(1.0, 2.0))
        );
    }
}
