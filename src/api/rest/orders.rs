use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthIdentity;
use crate::engine::ledger::NewOrder;
use crate::error::AppError;
use crate::models::event::RealtimeEvent;
use crate::models::order::{DeliveryAddress, Order, OrderStatus, StatusHistoryEntry};
use crate::models::position::{GeoPoint, PositionSample};
use crate::models::role::Role;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/history", get(order_history))
        .route("/orders/:id/location", get(order_location))
        .route("/orders/:id/status", put(update_status))
        .route("/orders/:id/issues", post(report_issue))
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub label: String,
    pub coordinates: [f64; 2],
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub vendor_id: Uuid,
    pub subtotal: f64,
    #[serde(default)]
    pub discount: f64,
    pub delivery_address: AddressRequest,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub target_status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct ReportIssueRequest {
    pub description: String,
}

#[derive(Serialize)]
pub struct OrderLocation {
    pub order_id: Uuid,
    pub position: Option<PositionSample>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    identity.require_role(Role::Customer)?;

    let order = state
        .ledger
        .create(NewOrder {
            customer_id: identity.subject_id,
            vendor_id: payload.vendor_id,
            subtotal: payload.subtotal,
            discount: payload.discount,
            delivery_address: DeliveryAddress {
                label: payload.delivery_address.label,
                location: GeoPoint::from_coordinates(payload.delivery_address.coordinates)?,
            },
        })
        .await?;

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.ledger.get_for(id, identity).await?;
    Ok(Json(order))
}

async fn order_history(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StatusHistoryEntry>>, AppError> {
    let order = state.ledger.get_for(id, identity).await?;
    Ok(Json(order.status_history))
}

async fn order_location(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderLocation>, AppError> {
    state.ledger.get_for(id, identity).await?;
    let position = state.positions.order_position(id).await?;

    Ok(Json(OrderLocation {
        order_id: id,
        position,
    }))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .ledger
        .transition(id, payload.target_status, identity, payload.note)
        .await?;
    Ok(Json(order))
}

async fn report_issue(
    State(state): State<Arc<AppState>>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportIssueRequest>,
) -> Result<Json<RealtimeEvent>, AppError> {
    let event = state
        .ledger
        .report_issue(id, identity, payload.description)
        .await?;
    Ok(Json(event))
}
