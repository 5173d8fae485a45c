use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::role::{Identity, Role};

use OrderStatus::*;

/// One legal edge of the order state machine and the roles allowed to take it.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub allowed: &'static [Role],
}

const VENDOR_SIDE: &[Role] = &[Role::Vendor, Role::Admin];
const CANCELLERS: &[Role] = &[Role::Customer, Role::Vendor, Role::Admin];
const COURIER_ONLY: &[Role] = &[Role::Courier];
const COURIER_OR_ADMIN: &[Role] = &[Role::Courier, Role::Admin];

/// Adding an edge or a role is an edit to this table only.
pub const EDGES: &[Edge] = &[
    Edge { from: Pending, to: Accepted, allowed: VENDOR_SIDE },
    Edge { from: Pending, to: Rejected, allowed: VENDOR_SIDE },
    Edge { from: Pending, to: Cancelled, allowed: CANCELLERS },
    Edge { from: Accepted, to: Preparing, allowed: VENDOR_SIDE },
    Edge { from: Accepted, to: ReadyForPickup, allowed: VENDOR_SIDE },
    Edge { from: Accepted, to: Cancelled, allowed: CANCELLERS },
    Edge { from: Preparing, to: ReadyForPickup, allowed: VENDOR_SIDE },
    Edge { from: ReadyForPickup, to: PickedUp, allowed: COURIER_ONLY },
    Edge { from: ReadyForPickup, to: DeliveryFailed, allowed: COURIER_OR_ADMIN },
    Edge { from: PickedUp, to: InTransit, allowed: COURIER_ONLY },
    Edge { from: InTransit, to: Delivered, allowed: COURIER_ONLY },
];

pub fn edge(from: OrderStatus, to: OrderStatus) -> Option<&'static Edge> {
    EDGES.iter().find(|edge| edge.from == from && edge.to == to)
}

pub fn targets_from(from: OrderStatus) -> impl Iterator<Item = OrderStatus> {
    EDGES
        .iter()
        .filter(move |edge| edge.from == from)
        .map(|edge| edge.to)
}

/// Checks that `actor` may take `edge` on this particular order: the role must
/// be listed for the edge, and non-admins must be the matching party.
pub fn authorize(order: &Order, edge: &Edge, actor: Identity) -> Result<(), AppError> {
    let denied = AppError::Unauthorized {
        current: order.status,
    };

    if !edge.allowed.contains(&actor.role) {
        return Err(denied);
    }

    let is_party = match actor.role {
        Role::Admin => true,
        Role::Customer => order.customer_id == actor.subject_id,
        Role::Vendor => order.vendor_id == actor.subject_id,
        Role::Courier => order.courier_id == Some(actor.subject_id),
    };

    if is_party { Ok(()) } else { Err(denied) }
}
