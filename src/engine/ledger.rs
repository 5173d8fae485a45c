use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::transitions;
use crate::error::AppError;
use crate::geo::{self, FeeSchedule};
use crate::models::event::{EventKind, RealtimeEvent};
use crate::models::order::{
    DeliveryAddress, OfferRejection, Order, OrderCharges, OrderStatus, StatusHistoryEntry,
};
use crate::models::role::{Identity, Role};
use crate::observability::metrics::Metrics;
use crate::realtime::channel::RealtimeChannel;
use crate::realtime::topic::Topic;
use crate::store::orders::{ConditionalWrite, OrderStore, StatusGuard};
use crate::store::vendors::VendorRegistry;

/// Conditional status writes retried after losing to a concurrent writer.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct LedgerSettings {
    pub fee_schedule: FeeSchedule,
    pub tax_rate: f64,
    pub assign_timeout: Duration,
}

/// Validated input from the ordering flow.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub subtotal: f64,
    pub discount: f64,
    pub delivery_address: DeliveryAddress,
}

/// Owner of order aggregates and their status history.
///
/// Every status change goes through [`OrderLedger::transition`] and every
/// courier assignment through [`OrderLedger::assign_courier`]; both are
/// conditional writes against the order store, so concurrent callers are
/// linearized per order. Events are emitted only after the write lands.
pub struct OrderLedger {
    store: Arc<dyn OrderStore>,
    vendors: Arc<VendorRegistry>,
    channel: Arc<RealtimeChannel>,
    rejections: DashMap<Uuid, Vec<OfferRejection>>,
    next_number: AtomicU64,
    settings: LedgerSettings,
    metrics: Metrics,
}

impl OrderLedger {
    pub fn new(
        store: Arc<dyn OrderStore>,
        vendors: Arc<VendorRegistry>,
        channel: Arc<RealtimeChannel>,
        settings: LedgerSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            vendors,
            channel,
            rejections: DashMap::new(),
            next_number: AtomicU64::new(1),
            settings,
            metrics,
        }
    }

    pub async fn create(&self, request: NewOrder) -> Result<Order, AppError> {
        let vendor = self
            .vendors
            .get(request.vendor_id)
            .filter(|vendor| vendor.active)
            .ok_or_else(|| AppError::NotFound(format!("vendor {} not found", request.vendor_id)))?;

        if !request.subtotal.is_finite() || request.subtotal < 0.0 {
            return Err(AppError::BadRequest("subtotal must be >= 0".to_string()));
        }
        if !request.discount.is_finite()
            || request.discount < 0.0
            || request.discount > request.subtotal
        {
            return Err(AppError::BadRequest(
                "discount must be between 0 and the subtotal".to_string(),
            ));
        }

        let distance_km = geo::distance_km(&vendor.location, &request.delivery_address.location);
        let delivery_fee = geo::delivery_fee(distance_km, &self.settings.fee_schedule);
        let tax = round_cents((request.subtotal - request.discount) * self.settings.tax_rate);
        let total = round_cents(request.subtotal + delivery_fee + tax - request.discount);

        let now = Utc::now();
        let number = format!("ORD-{:06}", self.next_number.fetch_add(1, Ordering::Relaxed));
        let order = Order {
            id: Uuid::new_v4(),
            number,
            customer_id: request.customer_id,
            vendor_id: vendor.id,
            courier_id: None,
            status: OrderStatus::Pending,
            status_history: vec![StatusHistoryEntry {
                status: OrderStatus::Pending,
                timestamp: now,
                actor_id: request.customer_id,
                note: None,
            }],
            charges: OrderCharges {
                subtotal: request.subtotal,
                delivery_fee,
                tax,
                discount: request.discount,
                total,
            },
            pickup: vendor.location,
            delivery_address: request.delivery_address,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(order.clone()).await?;

        info!(
            order_id = %order.id,
            number = %order.number,
            vendor_id = %order.vendor_id,
            distance_km,
            "order created"
        );
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    /// Reads an order on behalf of `viewer`: its parties and admins only.
    pub async fn get_for(&self, order_id: Uuid, viewer: Identity) -> Result<Order, AppError> {
        let order = self.get(order_id).await?;
        if viewer.role == Role::Admin || order.is_party(viewer.subject_id) {
            Ok(order)
        } else {
            Err(AppError::Unauthorized {
                current: order.status,
            })
        }
    }

    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Identity,
        note: Option<String>,
    ) -> Result<Order, AppError> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let order = self.get(order_id).await?;
            let previous = order.status;

            let Some(edge) = transitions::edge(previous, target) else {
                self.record_transition("invalid");
                return Err(AppError::InvalidTransition {
                    current: previous,
                    target,
                });
            };
            if let Err(err) = transitions::authorize(&order, edge, actor) {
                self.record_transition("unauthorized");
                return Err(err);
            }

            let guard = StatusGuard {
                expected_status: previous,
                expected_courier: order.courier_id,
            };
            let entry = StatusHistoryEntry {
                status: target,
                timestamp: Utc::now(),
                actor_id: actor.subject_id,
                note: note.clone(),
            };

            match self.store.update_status_if(order_id, guard, entry).await? {
                ConditionalWrite::Applied(updated) => {
                    self.record_transition("success");
                    info!(
                        order_id = %order_id,
                        from = %previous,
                        to = %target,
                        actor_id = %actor.subject_id,
                        role = %actor.role,
                        "order transitioned"
                    );
                    self.publish_status(&updated, Some(previous), actor.subject_id, note);
                    return Ok(updated);
                }
                ConditionalWrite::Conflict(current) if attempts >= MAX_TRANSITION_ATTEMPTS => {
                    self.record_transition("conflict");
                    warn!(order_id = %order_id, attempts, "transition kept losing to concurrent writers");
                    return Err(AppError::InvalidTransition {
                        current: current.status,
                        target,
                    });
                }
                ConditionalWrite::Conflict(_) => continue,
            }
        }
    }

    /// Claims a ready order for `courier_id`. Exactly one concurrent caller
    /// wins; the others get `AlreadyAssigned`, as does a claim that cannot
    /// complete within the configured timeout.
    pub async fn assign_courier(&self, order_id: Uuid, courier_id: Uuid) -> Result<Order, AppError> {
        let write = timeout(
            self.settings.assign_timeout,
            self.store
                .set_courier_if_unassigned(order_id, courier_id, OrderStatus::ReadyForPickup),
        )
        .await;

        let outcome = match write {
            Ok(result) => result?,
            Err(_) => {
                self.record_assignment("timeout");
                warn!(order_id = %order_id, courier_id = %courier_id, "courier assignment timed out");
                return Err(AppError::AlreadyAssigned);
            }
        };

        match outcome {
            ConditionalWrite::Applied(order) => {
                self.record_assignment("success");
                info!(order_id = %order_id, courier_id = %courier_id, "courier assigned");
                self.publish_status(&order, None, courier_id, Some("courier assigned".to_string()));
                Ok(order)
            }
            ConditionalWrite::Conflict(order) if order.courier_id.is_some() => {
                self.record_assignment("already_assigned");
                info!(order_id = %order_id, courier_id = %courier_id, "courier lost assignment race");
                Err(AppError::AlreadyAssigned)
            }
            ConditionalWrite::Conflict(order) => {
                self.record_assignment("not_ready");
                Err(AppError::NotReadyForPickup {
                    current: order.status,
                })
            }
        }
    }

    /// Records a courier declining an offer. Only open offers can be declined:
    /// the order must be READY_FOR_PICKUP with no courier. Declining the same
    /// offer again returns the first record. Status and assignment are left
    /// untouched so another courier can still claim the order.
    pub async fn reject_offer(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        reason: Option<String>,
    ) -> Result<OfferRejection, AppError> {
        let order = self.get(order_id).await?;
        match order.courier_id {
            Some(holder) if holder == courier_id => {
                return Err(AppError::BadRequest(
                    "cannot decline an order already assigned to you".to_string(),
                ));
            }
            Some(_) => return Err(AppError::AlreadyAssigned),
            None => {}
        }
        if order.status != OrderStatus::ReadyForPickup {
            return Err(AppError::NotReadyForPickup {
                current: order.status,
            });
        }

        let mut log = self.rejections.entry(order_id).or_default();
        if let Some(existing) = log.iter().find(|entry| entry.courier_id == courier_id) {
            return Ok(existing.clone());
        }

        let rejection = OfferRejection {
            order_id,
            courier_id,
            reason,
            rejected_at: Utc::now(),
        };
        log.push(rejection.clone());
        drop(log);
        self.record_assignment("offer_rejected");

        info!(order_id = %order_id, courier_id = %courier_id, "courier declined offer");
        Ok(rejection)
    }

    pub fn offer_rejections(&self, order_id: Uuid) -> Vec<OfferRejection> {
        self.rejections
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Status history exactly as appended.
    pub async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AppError> {
        Ok(self.get(order_id).await?.status_history)
    }

    /// Orders waiting for a courier, oldest first.
    pub async fn ready_unassigned(&self) -> Result<Vec<Order>, AppError> {
        let ready = self.store.list_by_status(OrderStatus::ReadyForPickup).await?;
        Ok(ready
            .into_iter()
            .filter(|order| order.courier_id.is_none())
            .collect())
    }

    /// Broadcasts a delivery problem reported by the assigned courier (or an
    /// admin) on the order topic. The order itself is not changed.
    pub async fn report_issue(
        &self,
        order_id: Uuid,
        reporter: Identity,
        description: String,
    ) -> Result<RealtimeEvent, AppError> {
        let order = self.get(order_id).await?;
        let allowed = match reporter.role {
            Role::Admin => true,
            Role::Courier => order.courier_id == Some(reporter.subject_id),
            _ => false,
        };
        if !allowed {
            return Err(AppError::Unauthorized {
                current: order.status,
            });
        }
        if description.trim().is_empty() {
            return Err(AppError::BadRequest("description cannot be empty".to_string()));
        }

        let event = RealtimeEvent::new(
            EventKind::DeliveryIssueReported,
            order_id,
            json!({
                "reported_by": reporter.subject_id,
                "role": reporter.role,
                "status": order.status,
                "description": description,
            }),
        );
        self.channel.publish(&Topic::Order(order_id), event.clone());

        warn!(order_id = %order_id, reporter = %reporter.subject_id, "delivery issue reported");
        Ok(event)
    }

    pub async fn count(&self) -> Result<usize, AppError> {
        self.store.count().await
    }

    fn publish_status(
        &self,
        order: &Order,
        previous: Option<OrderStatus>,
        actor_id: Uuid,
        note: Option<String>,
    ) {
        let event = RealtimeEvent::new(
            EventKind::OrderStatusChanged,
            order.id,
            json!({
                "number": order.number,
                "status": order.status,
                "previous_status": previous,
                "courier_id": order.courier_id,
                "actor_id": actor_id,
                "note": note,
            }),
        );
        self.channel.publish(&Topic::Order(order.id), event);
    }

    fn record_transition(&self, outcome: &str) {
        self.metrics
            .order_transitions_total
            .with_label_values(&[outcome])
            .inc();
    }

    fn record_assignment(&self, outcome: &str) {
        self.metrics
            .courier_assignments_total
            .with_label_values(&[outcome])
            .inc();
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
