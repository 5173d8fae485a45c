use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid transition from {current} to {target}")]
    InvalidTransition {
        current: OrderStatus,
        target: OrderStatus,
    },

    #[error("not allowed to change order in status {current}")]
    Unauthorized { current: OrderStatus },

    #[error("order already assigned to another courier")]
    AlreadyAssigned,

    #[error("order is not ready for pickup (status {current})")]
    NotReadyForPickup { current: OrderStatus },

    #[error("no live location; report a position first")]
    LocationUnavailable,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, shared by HTTP and websocket responses.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Unauthorized { .. } => "unauthorized",
            AppError::AlreadyAssigned => "already_assigned",
            AppError::NotReadyForPickup { .. } => "not_ready_for_pickup",
            AppError::LocationUnavailable => "location_unavailable",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Forbidden(_) => "forbidden",
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn current_status(&self) -> Option<OrderStatus> {
        match self {
            AppError::InvalidTransition { current, .. }
            | AppError::Unauthorized { current }
            | AppError::NotReadyForPickup { current } => Some(*current),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidTransition { .. }
            | AppError::NotReadyForPickup { .. }
            | AppError::LocationUnavailable
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::AlreadyAssigned => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "current_status": self.current_status(),
        }));

        (status, body).into_response()
    }
}
