use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    OrderStatusChanged,
    DeliveryLocationUpdated,
    DeliveryEtaUpdated,
    DeliveryIssueReported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event: EventKind,
    pub order_id: Uuid,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeEvent {
    pub fn new(event: EventKind, order_id: Uuid, payload: Value) -> Self {
        Self {
            event,
            order_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}
