use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthIdentity;
use crate::error::AppError;
use crate::geo;
use crate::models::dispatch::DispatchCandidate;
use crate::models::event::{EventKind, RealtimeEvent};
use crate::models::order::{OfferRejection, Order};
use crate::models::position::{GeoPoint, PositionSample};
use crate::models::role::{Identity, Role};
use crate::realtime::topic::Topic;
use crate::state::AppState;

const DEFAULT_JOB_RADIUS_KM: f64 = 5.0;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers/location", post(report_location))
        .route("/couriers/location/batch", post(report_location_batch))
        .route("/couriers/jobs", get(nearby_jobs))
        .route("/couriers/jobs/:order_id/accept", post(accept_job))
        .route("/couriers/jobs/:order_id/reject", post(reject_job))
}

#[derive(Deserialize)]
pub struct LocationReport {
    pub coordinates: [f64; 2],
    pub order_id: Option<Uuid>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct LocationAck {
    pub sample: PositionSample,
    pub delivered_to: usize,
}

#[derive(Deserialize)]
pub struct NearbyJobsQuery {
    pub max_distance_km: Option<f64>,
}

#[derive(Deserialize, Default)]
pub struct RejectJobRequest {
    pub reason: Option<String>,
}

fn require_courier(identity: Identity) -> Result<Uuid, AppError> {
    identity.require_role(Role::Courier)?;
    Ok(identity.subject_id)
}

fn to_sample(courier_id: Uuid, report: LocationReport) -> Result<PositionSample, AppError> {
    Ok(PositionSample {
        subject_id: courier_id,
        order_id: report.order_id,
        coordinates: GeoPoint::from_coordinates(report.coordinates)?,
        accuracy: report.accuracy,
        speed: report.speed,
        heading: report.heading,
        captured_at: report.captured_at.unwrap_or_else(Utc::now),
    })
}

/// Loads the order a sample is scoped to. Only the courier assigned to the
/// order may report for it, and nothing is stored when that check fails.
async fn assigned_order(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
) -> Result<Order, AppError> {
    let order = state.ledger.get(order_id).await?;
    if order.courier_id != Some(courier_id) {
        return Err(AppError::Unauthorized {
            current: order.status,
        });
    }
    Ok(order)
}

/// Broadcasts an order-scoped sample and the ETA it implies.
async fn broadcast_for_order(
    state: &AppState,
    order: &Order,
    sample: &PositionSample,
) -> Result<usize, AppError> {
    let delivered = state.channel.publish_location(order.id, sample).await?;

    let remaining_km = geo::distance_km(&sample.coordinates, &order.delivery_address.location);
    let eta = RealtimeEvent::new(
        EventKind::DeliveryEtaUpdated,
        order.id,
        json!({
            "distance_km": remaining_km,
            "eta_minutes": state.eta_model.minutes_for(remaining_km),
        }),
    );
    state.channel.publish(&Topic::Order(order.id), eta);

    Ok(delivered)
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<LocationReport>,
) -> Result<Json<LocationAck>, AppError> {
    let courier_id = require_courier(identity)?;
    let sample = to_sample(courier_id, payload)?;

    let order = match sample.order_id {
        Some(order_id) => Some(assigned_order(&state, order_id, courier_id).await?),
        None => None,
    };

    state.positions.record_courier(&sample).await?;
    state
        .metrics
        .position_writes_total
        .with_label_values(&["single"])
        .inc();

    let delivered_to = match order {
        Some(order) => broadcast_for_order(&state, &order, &sample).await?,
        None => 0,
    };

    Ok(Json(LocationAck {
        sample,
        delivered_to,
    }))
}

async fn report_location_batch(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<Vec<LocationReport>>,
) -> Result<Json<LocationAck>, AppError> {
    let courier_id = require_courier(identity)?;
    let samples = payload
        .into_iter()
        .map(|report| to_sample(courier_id, report))
        .collect::<Result<Vec<_>, _>>()?;

    let mut orders: HashMap<Uuid, Order> = HashMap::new();
    for order_id in samples.iter().filter_map(|sample| sample.order_id) {
        if !orders.contains_key(&order_id) {
            let order = assigned_order(&state, order_id, courier_id).await?;
            orders.insert(order_id, order);
        }
    }

    let latest = state.positions.record_batch(&samples).await?;
    state
        .metrics
        .position_writes_total
        .with_label_values(&["batch"])
        .inc_by(samples.len() as u64);

    let delivered_to = match latest.order_id.and_then(|order_id| orders.get(&order_id)) {
        Some(order) => broadcast_for_order(&state, order, &latest).await?,
        None => 0,
    };

    Ok(Json(LocationAck {
        sample: latest,
        delivered_to,
    }))
}

async fn nearby_jobs(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Query(query): Query<NearbyJobsQuery>,
) -> Result<Json<Vec<DispatchCandidate>>, AppError> {
    let courier_id = require_courier(identity)?;
    let radius = query.max_distance_km.unwrap_or(DEFAULT_JOB_RADIUS_KM);

    let candidates = state.matcher.nearby_orders_for(courier_id, radius).await?;
    Ok(Json(candidates))
}

async fn accept_job(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let courier_id = require_courier(identity)?;

    match state.ledger.assign_courier(order_id, courier_id).await {
        Ok(order) => Ok(Json(order)),
        Err(err) => {
            if matches!(err, AppError::AlreadyAssigned) {
                warn!(order_id = %order_id, courier_id = %courier_id, "job already taken");
            }
            Err(err)
        }
    }
}

async fn reject_job(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<RejectJobRequest>>,
) -> Result<Json<OfferRejection>, AppError> {
    let courier_id = require_courier(identity)?;
    let reason = payload.and_then(|Json(body)| body.reason);

    let rejection = state
        .ledger
        .reject_offer(order_id, courier_id, reason)
        .await?;
    Ok(Json(rejection))
}
