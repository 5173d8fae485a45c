use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthIdentity;
use crate::error::AppError;
use crate::models::dispatch::NearbyVendor;
use crate::models::position::GeoPoint;
use crate::models::role::Role;
use crate::models::vendor::Vendor;
use crate::state::AppState;

const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vendors", post(register_vendor))
        .route("/vendors/nearby", get(nearby_vendors))
}

#[derive(Deserialize)]
pub struct RegisterVendorRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub coordinates: [f64; 2],
    pub service_radius_km: Option<f64>,
    pub area: Option<String>,
    pub active: Option<bool>,
}

#[derive(Deserialize)]
pub struct NearbyVendorsQuery {
    pub lng: f64,
    pub lat: f64,
    pub max_distance_km: Option<f64>,
    pub area: Option<String>,
}

async fn register_vendor(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<RegisterVendorRequest>,
) -> Result<Json<Vendor>, AppError> {
    identity.require_role(Role::Admin)?;

    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("vendor name cannot be empty".to_string()));
    }
    let service_radius_km = payload
        .service_radius_km
        .unwrap_or(state.default_service_radius_km);
    if !service_radius_km.is_finite() || service_radius_km <= 0.0 {
        return Err(AppError::BadRequest(
            "service_radius_km must be a positive number".to_string(),
        ));
    }

    let vendor = Vendor {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name,
        location: GeoPoint::from_coordinates(payload.coordinates)?,
        service_radius_km,
        area: payload.area,
        active: payload.active.unwrap_or(true),
        registered_at: Utc::now(),
    };
    state.vendors.upsert(vendor.clone());

    info!(vendor_id = %vendor.id, name = %vendor.name, "vendor registered");
    Ok(Json(vendor))
}

async fn nearby_vendors(
    State(state): State<Arc<AppState>>,
    AuthIdentity(_identity): AuthIdentity,
    Query(query): Query<NearbyVendorsQuery>,
) -> Result<Json<Vec<NearbyVendor>>, AppError> {
    let point = GeoPoint::new(query.lng, query.lat)?;
    let radius = query.max_distance_km.unwrap_or(DEFAULT_SEARCH_RADIUS_KM);

    let vendors = state
        .matcher
        .nearby_vendors_for(&point, radius, query.area.as_deref())?;
    Ok(Json(vendors))
}
