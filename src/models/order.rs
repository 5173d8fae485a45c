use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::position::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Rejected,
    Preparing,
    ReadyForPickup,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
    DeliveryFailed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::Rejected,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::PickedUp,
        OrderStatus::InTransit,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::DeliveryFailed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected
                | OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::DeliveryFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::ReadyForPickup => "READY_FOR_PICKUP",
            OrderStatus::PickedUp => "PICKED_UP",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::DeliveryFailed => "DELIVERY_FAILED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited step of an order's lifecycle. Entries are appended, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderCharges {
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub tax: f64,
    pub discount: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAddress {
    pub label: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub number: String,
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub status: OrderStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    pub charges: OrderCharges,
    pub pickup: GeoPoint,
    pub delivery_address: DeliveryAddress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Status obtained by replaying the history; matches `status` for every
    /// order written through the ledger.
    pub fn replayed_status(&self) -> Option<OrderStatus> {
        self.status_history.last().map(|entry| entry.status)
    }

    pub fn is_party(&self, subject_id: Uuid) -> bool {
        self.customer_id == subject_id
            || self.vendor_id == subject_id
            || self.courier_id == Some(subject_id)
    }
}

/// Courier declining an offered job. Kept apart from the status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRejection {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub reason: Option<String>,
    pub rejected_at: DateTime<Utc>,
}
