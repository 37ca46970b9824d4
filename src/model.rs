use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_LOCATION: &str = "Unknown Location";

/// One stored reading of an access point at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub access_point_id: String,
    pub display_name: Option<String>,
    pub signal_strength: i32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub captured_at: DateTime<Utc>,
    pub location_key: Option<String>,
    pub location_label: Option<String>,
}

/// An access point as reported by a single scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPoint {
    pub id: String,
    pub name: String,
    pub signal_strength: i32,
}

impl AccessPoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>, signal_strength: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            signal_strength,
        }
    }

    /// Hidden networks report an empty name; show the identifier instead.
    pub fn display(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A coordinate rounded to thousandths of a degree, stored as integers so
/// equality is exact.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default)]
pub struct Locality {
    latitude: i32,
    longitude: i32,
}

impl Locality {
    /// Rounds half away from zero on the binary product `degrees * 1000`, so
    /// an input such as 1.0005 (stored as 1.000499...) lands on 1.000.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        let latitude = (latitude * 1000.0).round() as i32;
        let longitude = (longitude * 1000.0).round() as i32;
        Self {
            latitude,
            longitude,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude as f64 / 1000.0
    }

    pub fn longitude(&self) -> f64 {
        self.longitude as f64 / 1000.0
    }

    pub fn key(&self) -> String {
        format!("lat={:.3},lon={:.3}", self.latitude(), self.longitude())
    }

    /// Parses a key produced by [`Locality::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let (lat, lon) = key.split_once(',')?;
        let lat: f64 = lat.trim().strip_prefix("lat=")?.parse().ok()?;
        let lon: f64 = lon.trim().strip_prefix("lon=")?.parse().ok()?;
        Some(Self::new(lat, lon))
    }
}

impl From<Coordinate> for Locality {
    fn from(value: Coordinate) -> Self {
        Self::new(value.latitude, value.longitude)
    }
}

/// Trims a label answer, falling back to [`UNKNOWN_LOCATION`] for empty or
/// cancelled input.
pub fn normalize_label(input: Option<&str>) -> String {
    input
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .unwrap_or(UNKNOWN_LOCATION)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_readings_share_a_key() {
        let a = Locality::new(40.7128, -74.0060);
        let b = Locality::new(40.71276, -74.00601);
        assert_eq!(a, b);
        assert_eq!(a.key(), "lat=40.713,lon=-74.006");
        assert_eq!(b.key(), "lat=40.713,lon=-74.006");
    }

    #[test]
    fn neighbouring_cells_differ() {
        let a = Locality::new(40.7124, -74.0060);
        let b = Locality::new(40.7126, -74.0060);
        assert_ne!(a, b);
        assert_eq!(a.key(), "lat=40.712,lon=-74.006");
    }

    #[test]
    fn key_round_trips_through_parse() {
        let a = Locality::new(-33.8688, 151.2093);
        assert_eq!(Locality::from_key(&a.key()), Some(a));
        assert_eq!(Locality::from_key("garbage"), None);
        assert_eq!(Locality::from_key("lat=1.0"), None);
    }

    #[test]
    fn unknown_is_zero() {
        assert_eq!(Locality::default().key(), "lat=0.000,lon=0.000");
    }

    #[test]
    fn rounding_uses_the_binary_product() {
        assert_eq!(Locality::new(1.0005, -1.0005).key(), "lat=1.000,lon=-1.000");
        assert_eq!(Locality::new(1.0006, -1.0006).key(), "lat=1.001,lon=-1.001");
        assert_eq!(Locality::new(0.0004, -0.0004).key(), "lat=0.000,lon=0.000");
        assert_eq!(Locality::new(1.0005, 0.0), Locality::new(1.0005, 0.0));
    }

    #[test]
    fn labels_fall_back_to_unknown() {
        assert_eq!(normalize_label(Some("  Kitchen ")), "Kitchen");
        assert_eq!(normalize_label(Some("   ")), UNKNOWN_LOCATION);
        assert_eq!(normalize_label(None), UNKNOWN_LOCATION);
    }

    #[test]
    fn hidden_network_displays_id() {
        let ap = AccessPoint::new("AA:BB", "", -40);
        assert_eq!(ap.display(), "AA:BB");
    }
}
