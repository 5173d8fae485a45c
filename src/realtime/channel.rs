use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::{EventKind, RealtimeEvent};
use crate::models::order::StatusHistoryEntry;
use crate::models::position::PositionSample;
use crate::models::role::Identity;
use crate::observability::metrics::Metrics;
use crate::realtime::topic::Topic;
use crate::store::positions::EphemeralPositionStore;

pub type ConnectionId = Uuid;

/// Messages queued for delivery to one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Outbound {
    Authenticated {
        identity: Identity,
    },
    Joined {
        topic: Topic,
    },
    Left {
        topic: Topic,
    },
    CatchUp {
        order_id: Uuid,
        position: Option<PositionSample>,
        history: Vec<StatusHistoryEntry>,
    },
    Event(RealtimeEvent),
    Error {
        code: String,
        message: String,
    },
}

impl From<&AppError> for Outbound {
    fn from(err: &AppError) -> Self {
        Outbound::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated(Identity),
}

struct Connection {
    state: ConnectionState,
    sender: mpsc::Sender<Outbound>,
    topics: HashSet<Topic>,
}

/// Process-wide registry of live connections and their topic memberships.
///
/// Memberships live only in memory and only while a connection is
/// authenticated. Delivery is best-effort: every connection has a bounded
/// queue and a full queue drops the event instead of blocking the publisher.
pub struct RealtimeChannel {
    connections: DashMap<ConnectionId, Connection>,
    topics: DashMap<Topic, HashSet<ConnectionId>>,
    positions: Arc<EphemeralPositionStore>,
    buffer_size: usize,
    metrics: Metrics,
}

impl RealtimeChannel {
    pub fn new(positions: Arc<EphemeralPositionStore>, buffer_size: usize, metrics: Metrics) -> Self {
        Self {
            connections: DashMap::new(),
            topics: DashMap::new(),
            positions,
            buffer_size: buffer_size.max(1),
            metrics,
        }
    }

    /// Registers a new transport connection in the unauthenticated state.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();

        self.connections.insert(
            id,
            Connection {
                state: ConnectionState::Unauthenticated,
                sender,
                topics: HashSet::new(),
            },
        );
        self.metrics.realtime_connections.inc();
        debug!(connection_id = %id, "connection registered");

        (id, receiver)
    }

    pub fn state(&self, connection: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&connection).map(|entry| entry.state)
    }

    pub fn identity(&self, connection: ConnectionId) -> Result<Identity, AppError> {
        match self.state(connection) {
            Some(ConnectionState::Authenticated(identity)) => Ok(identity),
            Some(ConnectionState::Unauthenticated) => Err(AppError::Unauthenticated(
                "authenticate before using topics".to_string(),
            )),
            None => Err(AppError::NotFound(format!(
                "connection {connection} not found"
            ))),
        }
    }

    /// Marks the connection authenticated. Switching to a different identity
    /// drops every membership held under the previous one.
    pub fn authenticate(&self, connection: ConnectionId, identity: Identity) -> Result<(), AppError> {
        let dropped = {
            let mut entry = self
                .connections
                .get_mut(&connection)
                .ok_or_else(|| AppError::NotFound(format!("connection {connection} not found")))?;

            let previous_state = entry.state;
            let dropped = match previous_state {
                ConnectionState::Authenticated(previous) if previous != identity => {
                    std::mem::take(&mut entry.topics)
                }
                _ => HashSet::new(),
            };
            entry.state = ConnectionState::Authenticated(identity);
            dropped
        };

        for topic in dropped {
            self.remove_member(&topic, connection);
        }

        info!(
            connection_id = %connection,
            subject_id = %identity.subject_id,
            role = %identity.role,
            "connection authenticated"
        );
        Ok(())
    }

    /// Adds the connection to `topic`. Joining twice is the same as once.
    pub fn join_topic(&self, connection: ConnectionId, topic: Topic) -> Result<(), AppError> {
        {
            let mut entry = self
                .connections
                .get_mut(&connection)
                .ok_or_else(|| AppError::NotFound(format!("connection {connection} not found")))?;

            if entry.state == ConnectionState::Unauthenticated {
                return Err(AppError::Unauthenticated(
                    "authenticate before joining topics".to_string(),
                ));
            }
            entry.topics.insert(topic.clone());
        }

        // Never hold a connection guard while locking the topic map.
        self.topics.entry(topic.clone()).or_default().insert(connection);
        debug!(connection_id = %connection, topic = %topic, "joined topic");
        Ok(())
    }

    /// Removes the connection from `topic`; leaving a topic not joined is a no-op.
    pub fn leave_topic(&self, connection: ConnectionId, topic: &Topic) {
        if let Some(mut entry) = self.connections.get_mut(&connection) {
            entry.topics.remove(topic);
        }
        self.remove_member(topic, connection);
    }

    pub fn topics_of(&self, connection: ConnectionId) -> HashSet<Topic> {
        self.connections
            .get(&connection)
            .map(|entry| entry.topics.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map(|members| members.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Closes a connection: memberships are discarded and the outbound queue
    /// is dropped. Safe to call more than once.
    pub fn disconnect(&self, connection: ConnectionId) {
        let Some((_, removed)) = self.connections.remove(&connection) else {
            return;
        };

        for topic in &removed.topics {
            self.remove_member(topic, connection);
        }
        self.metrics.realtime_connections.dec();
        info!(
            connection_id = %connection,
            topics = removed.topics.len(),
            "connection closed"
        );
    }

    /// Fans `event` out to every connection currently joined to `topic` and
    /// returns how many queues accepted it. Zero subscribers is not an error.
    pub fn publish(&self, topic: &Topic, event: RealtimeEvent) -> usize {
        let members: Vec<ConnectionId> = match self.topics.get(topic) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut stale = Vec::new();

        for member in members {
            let Some(sender) = self
                .connections
                .get(&member)
                .map(|entry| entry.sender.clone())
            else {
                stale.push(member);
                continue;
            };

            match sender.try_send(Outbound::Event(event.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.realtime_events_dropped.inc();
                    warn!(connection_id = %member, topic = %topic, "subscriber queue full; event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.realtime_events_dropped.inc();
                    stale.push(member);
                }
            }
        }

        for member in stale {
            self.remove_member(topic, member);
        }

        debug!(topic = %topic, delivered, "event published");
        delivered
    }

    /// Direct reply to one connection, bypassing topics.
    pub fn send_to(&self, connection: ConnectionId, message: Outbound) -> bool {
        let Some(sender) = self
            .connections
            .get(&connection)
            .map(|entry| entry.sender.clone())
        else {
            return false;
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                self.metrics.realtime_events_dropped.inc();
                false
            }
        }
    }

    /// Stores `sample` as the order's last known position, then broadcasts it
    /// on `order-<id>`. A failed store write stops the broadcast.
    pub async fn publish_location(
        &self,
        order_id: Uuid,
        sample: &PositionSample,
    ) -> Result<usize, AppError> {
        self.positions.record_order(order_id, sample).await?;

        let payload = json!({
            "courier_id": sample.subject_id,
            "coordinates": [sample.coordinates.lng, sample.coordinates.lat],
            "accuracy": sample.accuracy,
            "speed": sample.speed,
            "heading": sample.heading,
            "captured_at": sample.captured_at,
        });

        Ok(self.publish(
            &Topic::Order(order_id),
            RealtimeEvent::new(EventKind::DeliveryLocationUpdated, order_id, payload),
        ))
    }

    fn remove_member(&self, topic: &Topic, connection: ConnectionId) {
        if let Some(mut members) = self.topics.get_mut(topic) {
            members.remove(&connection);
        }
        self.topics.remove_if(topic, |_, members| members.is_empty());
    }
}
