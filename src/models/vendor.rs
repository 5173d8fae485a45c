use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::position::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub service_radius_km: f64,
    pub area: Option<String>,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}
