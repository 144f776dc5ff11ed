//! Coordinates and great-circle distance for "X km away" labels

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Create validated coordinates
    pub fn new(lat: f64, lng: f64) -> Result<Self, Error> {
        let coords = Self { lat, lng };
        coords.validate()?;
        Ok(coords)
    }

    /// Pair two optional columns, `None` unless both are present
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::validation(format!("latitude out of range: {}", self.lat)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::validation(format!("longitude out of range: {}", self.lng)));
        }
        Ok(())
    }
}

/// Unrounded haversine distance in kilometres
pub fn haversine_raw_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    // Clamp guards against rounding pushing h just past 1 for antipodes.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Haversine distance in kilometres rounded to one decimal
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    (haversine_raw_km(a, b) * 10.0).round() / 10.0
}

/// Display label such as `"3.2 km away"`
pub fn distance_label(a: Coordinates, b: Coordinates) -> String {
    km_label(haversine_km(a, b))
}

pub fn km_label(km: f64) -> String {
    format!("{:.1} km away", km)
}

/// Pair every item with its distance from `origin`, keeping the input order.
/// Items without a known position get `None`.
pub fn with_distances<T, F>(items: Vec<T>, origin: Coordinates, position: F) -> Vec<(T, Option<f64>)>
where
    F: Fn(&T) -> Option<Coordinates>,
{
    items
        .into_iter()
        .map(|item| {
            let distance = position(&item).map(|p| haversine_km(origin, p));
            (item, distance)
        })
        .collect()
}

/// Stable sort by distance, unknown positions last
pub fn sort_by_distance<T>(items: &mut [(T, Option<f64>)]) {
    items.sort_by(|(_, a), (_, b)| match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
