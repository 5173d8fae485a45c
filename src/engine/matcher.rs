use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use crate::engine::ledger::OrderLedger;
use crate::error::AppError;
use crate::geo::{self, EtaModel, FeeSchedule};
use crate::models::dispatch::{DispatchCandidate, NearbyVendor};
use crate::models::position::GeoPoint;
use crate::observability::metrics::Metrics;
use crate::store::positions::EphemeralPositionStore;
use crate::store::vendors::VendorRegistry;

/// Read-only proximity queries: ready jobs near a courier, vendors near a
/// customer. Results are sorted by distance with a stable sort, so equal
/// distances keep their enumeration order.
pub struct DispatchMatcher {
    ledger: Arc<OrderLedger>,
    positions: Arc<EphemeralPositionStore>,
    vendors: Arc<VendorRegistry>,
    fee_schedule: FeeSchedule,
    eta_model: EtaModel,
    metrics: Metrics,
}

impl DispatchMatcher {
    pub fn new(
        ledger: Arc<OrderLedger>,
        positions: Arc<EphemeralPositionStore>,
        vendors: Arc<VendorRegistry>,
        fee_schedule: FeeSchedule,
        eta_model: EtaModel,
        metrics: Metrics,
    ) -> Self {
        Self {
            ledger,
            positions,
            vendors,
            fee_schedule,
            eta_model,
            metrics,
        }
    }

    /// Unclaimed ready orders within `max_distance_km` of the courier's last
    /// reported position. Fails with `LocationUnavailable` when there is none.
    pub async fn nearby_orders_for(
        &self,
        courier_id: Uuid,
        max_distance_km: f64,
    ) -> Result<Vec<DispatchCandidate>, AppError> {
        validate_radius(max_distance_km)?;
        let start = Instant::now();

        let courier = self
            .positions
            .courier_position(courier_id)
            .await?
            .ok_or(AppError::LocationUnavailable)?;

        let mut candidates: Vec<DispatchCandidate> = self
            .ledger
            .ready_unassigned()
            .await?
            .into_iter()
            .filter_map(|order| {
                let distance_km = geo::distance_km(&courier.coordinates, &order.pickup);
                if distance_km > max_distance_km {
                    return None;
                }

                let trip_km =
                    distance_km + geo::distance_km(&order.pickup, &order.delivery_address.location);
                Some(DispatchCandidate {
                    estimated_delivery_minutes: self.eta_model.minutes_for(trip_km),
                    distance_km,
                    order,
                })
            })
            .collect();

        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        self.metrics
            .dispatch_query_seconds
            .with_label_values(&["nearby_orders"])
            .observe(start.elapsed().as_secs_f64());
        debug!(courier_id = %courier_id, candidates = candidates.len(), "nearby orders computed");

        Ok(candidates)
    }

    /// Active vendors within `max_distance_km` of `point`, optionally limited
    /// to one area. Each result says whether `point` is inside the vendor's
    /// own delivery radius, so callers can show vendors that are visible but
    /// cannot deliver.
    pub fn nearby_vendors_for(
        &self,
        point: &GeoPoint,
        max_distance_km: f64,
        area: Option<&str>,
    ) -> Result<Vec<NearbyVendor>, AppError> {
        validate_radius(max_distance_km)?;
        let start = Instant::now();

        let mut nearby: Vec<NearbyVendor> = self
            .vendors
            .active()
            .into_iter()
            .filter(|vendor| match (area, vendor.area.as_deref()) {
                (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .filter_map(|vendor| {
                let distance_km = geo::distance_km(point, &vendor.location);
                if distance_km > max_distance_km {
                    return None;
                }

                Some(NearbyVendor {
                    is_within_service_radius: distance_km <= vendor.service_radius_km,
                    delivery_fee: geo::delivery_fee(distance_km, &self.fee_schedule),
                    estimated_minutes: self.eta_model.minutes_for(distance_km),
                    distance_km,
                    vendor,
                })
            })
            .collect();

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        self.metrics
            .dispatch_query_seconds
            .with_label_values(&["nearby_vendors"])
            .observe(start.elapsed().as_secs_f64());

        Ok(nearby)
    }
}

fn validate_radius(max_distance_km: f64) -> Result<(), AppError> {
    if max_distance_km.is_finite() && max_distance_km > 0.0 {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "max_distance_km must be a positive number".to_string(),
        ))
    }
}
