//! Order ledger: the only writer of order records.
//!
//! ```text
//! created -> confirmed -> preparing -> ready_broadcasting -> ready_claimed_pending -> assigned -> delivered
//!                                          |        ^                 |
//!                                          |        +---- release ----+
//!                                          v
//!                                 expired_awaiting_manual --manual assign--> assigned
//!
//! any non-terminal status --cancel--> cancelled
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::order::{Order, OrderStatus};
use crate::store::{CasOutcome, DispatchStore, StoreError};

/// Each stale read means another writer moved the order forward, and the
/// lifecycle is short, so a handful of attempts always converges.
const MAX_CAS_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Confirm,
    StartPreparing,
    MarkReady,
    Claim { courier_id: Uuid },
    ConfirmClaim { courier_id: Uuid },
    ReleaseClaim { courier_id: Uuid },
    Expire,
    ManualAssign { courier_id: Uuid },
    Deliver { courier_id: Uuid },
    Cancel,
}

impl OrderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Confirm => "confirm",
            OrderEvent::StartPreparing => "start preparing",
            OrderEvent::MarkReady => "mark ready",
            OrderEvent::Claim { .. } => "be claimed",
            OrderEvent::ConfirmClaim { .. } => "confirm claim",
            OrderEvent::ReleaseClaim { .. } => "release claim",
            OrderEvent::Expire => "expire",
            OrderEvent::ManualAssign { .. } => "be manually assigned",
            OrderEvent::Deliver { .. } => "be delivered",
            OrderEvent::Cancel => "cancel",
        }
    }
}

/// Computes the record that results from applying `event` to `order`.
///
/// Pure: an illegal event yields an error and no record, so callers can
/// never persist a half-applied transition.
pub fn apply(order: &Order, event: OrderEvent, now: DateTime<Utc>) -> Result<Order, DispatchError> {
    use OrderStatus::*;

    let mut next = order.clone();

    match (order.status, event) {
        (Created, OrderEvent::Confirm) => next.status = Confirmed,
        (Confirmed, OrderEvent::StartPreparing) => next.status = Preparing,
        (Preparing, OrderEvent::MarkReady) => {
            next.status = ReadyBroadcasting;
            next.ready_at = Some(now);
        }
        (ReadyBroadcasting, OrderEvent::Claim { courier_id }) => {
            next.status = ReadyClaimedPending;
            next.courier_id = Some(courier_id);
            next.assignment_version += 1;
        }
        (ReadyClaimedPending, OrderEvent::ConfirmClaim { courier_id }) => {
            require_bound(order, courier_id)?;
            next.status = Assigned;
            next.assignment_version += 1;
        }
        (ReadyClaimedPending, OrderEvent::ReleaseClaim { courier_id }) => {
            require_bound(order, courier_id)?;
            next.status = ReadyBroadcasting;
            next.courier_id = None;
            next.assignment_version += 1;
        }
        (ReadyBroadcasting, OrderEvent::Expire) => next.status = ExpiredAwaitingManual,
        (ExpiredAwaitingManual, OrderEvent::ManualAssign { courier_id }) => {
            next.status = Assigned;
            next.courier_id = Some(courier_id);
            next.assignment_version += 1;
        }
        (Assigned, OrderEvent::Deliver { courier_id }) => {
            require_bound(order, courier_id)?;
            next.status = Delivered;
        }
        (status, OrderEvent::Cancel) if !status.is_terminal() => {
            next.status = Cancelled;
            if next.courier_id.take().is_some() {
                next.assignment_version += 1;
            }
        }
        (from, event) => {
            return Err(DispatchError::InvalidTransition {
                order_id: order.id,
                from,
                event: event.name(),
            });
        }
    }

    next.updated_at = now;
    Ok(next)
}

fn require_bound(order: &Order, courier_id: Uuid) -> Result<(), DispatchError> {
    if order.courier_id == Some(courier_id) {
        Ok(())
    } else {
        Err(DispatchError::Forbidden(format!(
            "order {} is not bound to courier {courier_id}",
            order.id
        )))
    }
}

/// Both sides of an accepted transition.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub previous: Order,
    pub current: Order,
}

#[derive(Clone)]
pub struct OrderLedger {
    store: Arc<dyn DispatchStore>,
}

impl OrderLedger {
    pub fn new(store: Arc<dyn DispatchStore>) -> Self {
        Self { store }
    }

    pub fn create(&self, order: Order) -> Result<Order, DispatchError> {
        self.store.insert_order(order.clone())?;
        Ok(order)
    }

    pub fn get(&self, id: Uuid) -> Result<Order, DispatchError> {
        self.store
            .order(id)?
            .ok_or(DispatchError::OrderNotFound(id))
    }

    pub fn list(&self) -> Result<Vec<Order>, DispatchError> {
        Ok(self.store.orders()?)
    }

    /// Applies `event` to the latest record, re-evaluating against fresh state
    /// whenever a concurrent writer gets there first.
    pub fn transition(
        &self,
        id: Uuid,
        event: OrderEvent,
        now: DateTime<Utc>,
    ) -> Result<Transitioned, DispatchError> {
        let mut current = self.get(id)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let next = apply(&current, event, now)?;
            match self.store.cas_order(current.stamp(), next)? {
                CasOutcome::Applied(applied) => {
                    return Ok(Transitioned {
                        previous: current,
                        current: applied,
                    });
                }
                CasOutcome::Stale(latest) => current = latest,
            }
        }

        Err(DispatchError::Storage(StoreError::Unavailable(format!(
            "order {id} kept changing under {}",
            event.name()
        ))))
    }

    /// Applies `event` only if the order is still exactly as `observed`.
    /// A single conditional write, never retried.
    pub fn transition_from(
        &self,
        observed: &Order,
        event: OrderEvent,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<Order>, DispatchError> {
        let next = apply(observed, event, now)?;
        Ok(self.store.cas_order(observed.stamp(), next)?)
    }
}
