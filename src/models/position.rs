use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lng: f64, lat: f64) -> Result<Self, AppError> {
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::BadRequest(format!(
                "longitude {lng} out of range [-180, 180]"
            )));
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::BadRequest(format!(
                "latitude {lat} out of range [-90, 90]"
            )));
        }

        Ok(Self { lng, lat })
    }

    /// Builds a point from a `[longitude, latitude]` pair as sent by devices.
    pub fn from_coordinates(coordinates: [f64; 2]) -> Result<Self, AppError> {
        Self::new(coordinates[0], coordinates[1])
    }
}

/// Last known position of a courier. Never persisted durably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSample {
    pub subject_id: Uuid,
    pub order_id: Option<Uuid>,
    pub coordinates: GeoPoint,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::GeoPoint;

    #[test]
    fn coordinates_are_longitude_first() {
        let point = GeoPoint::from_coordinates([77.5946, 12.9716]).unwrap();
        assert_eq!(point.lng, 77.5946);
        assert_eq!(point.lat, 12.9716);
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(GeoPoint::new(10.0, 91.0).is_err());
        assert!(GeoPoint::new(181.0, 0.0).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }
}
