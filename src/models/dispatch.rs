use serde::Serialize;

use crate::models::order::Order;
use crate::models::vendor::Vendor;

/// A ready order annotated with its distance from the asking courier.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchCandidate {
    pub order: Order,
    pub distance_km: f64,
    pub estimated_delivery_minutes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyVendor {
    pub vendor: Vendor,
    pub distance_km: f64,
    pub is_within_service_radius: bool,
    pub delivery_fee: f64,
    pub estimated_minutes: u32,
}
