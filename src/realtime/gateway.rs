use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::engine::ledger::OrderLedger;
use crate::error::AppError;
use crate::models::role::Identity;
use crate::realtime::channel::{ConnectionId, Outbound, RealtimeChannel};
use crate::realtime::topic::Topic;
use crate::store::positions::EphemeralPositionStore;

/// Client-to-server realtime messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Inbound {
    Authenticate { token: String },
    Join { topic: Topic },
    Leave { topic: Topic },
    CatchUp { order_id: Uuid },
    Logout,
}

#[derive(Debug)]
pub enum GatewayReply {
    Send(Outbound),
    Close,
}

/// Authenticates realtime connections and decides which topics each
/// identity may join:
/// - `role-<role>`: only the caller's own role, joined on authentication
/// - `order-<id>`: the order's customer, vendor, assigned courier, or admins
/// - `chat-<id>`: any authenticated connection
pub struct ConnectionGateway {
    channel: Arc<RealtimeChannel>,
    ledger: Arc<OrderLedger>,
    positions: Arc<EphemeralPositionStore>,
    tokens: TokenVerifier,
}

impl ConnectionGateway {
    pub fn new(
        channel: Arc<RealtimeChannel>,
        ledger: Arc<OrderLedger>,
        positions: Arc<EphemeralPositionStore>,
        tokens: TokenVerifier,
    ) -> Self {
        Self {
            channel,
            ledger,
            positions,
            tokens,
        }
    }

    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        self.channel.register()
    }

    /// A bad token leaves the connection unauthenticated but open, so the
    /// client can retry on the same transport.
    pub fn authenticate(&self, connection: ConnectionId, token: &str) -> Result<Identity, AppError> {
        let identity = match self.tokens.verify(token) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(connection_id = %connection, error = %err, "realtime authentication failed");
                return Err(err);
            }
        };

        self.channel.authenticate(connection, identity)?;
        self.channel
            .join_topic(connection, Topic::Role(identity.role))?;
        Ok(identity)
    }

    pub async fn join(&self, connection: ConnectionId, topic: Topic) -> Result<(), AppError> {
        let identity = self.channel.identity(connection)?;
        self.check_access(identity, &topic).await?;
        self.channel.join_topic(connection, topic)
    }

    pub fn leave(&self, connection: ConnectionId, topic: &Topic) -> Result<(), AppError> {
        self.channel.identity(connection)?;
        self.channel.leave_topic(connection, topic);
        Ok(())
    }

    /// Last known position plus full status history, for a client that just
    /// (re)joined an order topic and may have missed live events.
    pub async fn catch_up(
        &self,
        connection: ConnectionId,
        order_id: Uuid,
    ) -> Result<Outbound, AppError> {
        let identity = self.channel.identity(connection)?;
        let order = self.ledger.get_for(order_id, identity).await?;
        let position = self.positions.order_position(order_id).await?;

        Ok(Outbound::CatchUp {
            order_id,
            position,
            history: order.status_history,
        })
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.channel.disconnect(connection);
    }

    /// Applies one inbound message and returns what to tell the client.
    pub async fn handle(&self, connection: ConnectionId, message: Inbound) -> GatewayReply {
        debug!(connection_id = %connection, message = ?message, "realtime message");

        let result = match message {
            Inbound::Authenticate { token } => self
                .authenticate(connection, &token)
                .map(|identity| Outbound::Authenticated { identity }),
            Inbound::Join { topic } => self
                .join(connection, topic.clone())
                .await
                .map(|()| Outbound::Joined { topic }),
            Inbound::Leave { topic } => self
                .leave(connection, &topic)
                .map(|()| Outbound::Left { topic }),
            Inbound::CatchUp { order_id } => self.catch_up(connection, order_id).await,
            Inbound::Logout => {
                self.disconnect(connection);
                return GatewayReply::Close;
            }
        };

        match result {
            Ok(reply) => GatewayReply::Send(reply),
            Err(err) => GatewayReply::Send(Outbound::from(&err)),
        }
    }

    async fn check_access(&self, identity: Identity, topic: &Topic) -> Result<(), AppError> {
        match topic {
            Topic::Role(role) if *role == identity.role => Ok(()),
            Topic::Role(_) => Err(AppError::BadRequest(format!(
                "{topic} is not available to role {}",
                identity.role
            ))),
            Topic::Order(order_id) => self.ledger.get_for(*order_id, identity).await.map(|_| ()),
            Topic::Chat(_) => Ok(()),
        }
    }
}
