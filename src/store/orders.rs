use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus, StatusHistoryEntry};

/// Preconditions for a conditional status write. The write only lands if the
/// stored order still matches both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGuard {
    pub expected_status: OrderStatus,
    pub expected_courier: Option<Uuid>,
}

/// Outcome of a conditional write: either applied, or rejected because the
/// stored order no longer matched. Both carry the order as it now stands.
#[derive(Debug, Clone)]
pub enum ConditionalWrite {
    Applied(Order),
    Conflict(Order),
}

/// Durable writer-of-record for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, AppError>;

    /// Orders in `status`, oldest first. The order is stable between calls.
    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, AppError>;

    /// Sets the status and appends `entry` to the history in one atomic step.
    async fn update_status_if(
        &self,
        id: Uuid,
        guard: StatusGuard,
        entry: StatusHistoryEntry,
    ) -> Result<ConditionalWrite, AppError>;

    /// Sets the courier only when none is set and the order is in
    /// `required_status`.
    async fn set_courier_if_unassigned(
        &self,
        id: Uuid,
        courier_id: Uuid,
        required_status: OrderStatus,
    ) -> Result<ConditionalWrite, AppError>;

    async fn count(&self) -> Result<usize, AppError>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), AppError> {
        if self.orders.contains_key(&order.id) {
            return Err(AppError::Internal(format!("order {} already exists", order.id)));
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, AppError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(orders)
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        guard: StatusGuard,
        entry: StatusHistoryEntry,
    ) -> Result<ConditionalWrite, AppError> {
        // The entry guard holds the shard lock for the whole check-and-set.
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        if order.status != guard.expected_status || order.courier_id != guard.expected_courier {
            return Ok(ConditionalWrite::Conflict(order.clone()));
        }

        order.status = entry.status;
        order.updated_at = entry.timestamp;
        order.status_history.push(entry);

        Ok(ConditionalWrite::Applied(order.clone()))
    }

    async fn set_courier_if_unassigned(
        &self,
        id: Uuid,
        courier_id: Uuid,
        required_status: OrderStatus,
    ) -> Result<ConditionalWrite, AppError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        if order.courier_id.is_some() || order.status != required_status {
            return Ok(ConditionalWrite::Conflict(order.clone()));
        }

        order.courier_id = Some(courier_id);
        order.updated_at = Utc::now();

        Ok(ConditionalWrite::Applied(order.clone()))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.orders.len())
    }
}
