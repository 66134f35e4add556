//! Claim arbitration.
//!
//! Competing claims for one order are decided by a single conditional write
//! on the order record, guarded on the stamp observed while the order was
//! `ready_broadcasting`. Whoever lands that write wins; everyone else sees a
//! stale stamp and loses.
//!
//! The store only guarantees single-record atomicity, so the courier side is
//! reserved first and released again if the order write is lost:
//!
//! 1. reserve the courier (`active_order_id: None -> order`), remembering
//!    the courier revision that holds the reservation
//! 2. conditional write on the order (the linearization point)
//! 3. on a lost write, release the reservation unless the courier record
//!    moved on since step 1
//!
//! A cancellation racing a claim either lands before step 2 (the claim then
//! loses and releases its own reservation) or after it (the cancellation
//! finds the courier pointing at the order and unbinds it).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::ledger::{OrderEvent, OrderLedger};
use crate::engine::registry::{CourierRegistry, RESERVATION_GRACE};
use crate::engine::window::BroadcastWindow;
use crate::error::DispatchError;
use crate::models::order::Order;
use crate::store::CasOutcome;

/// Expected outcomes of a claim attempt. Losing a race is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
    NotOpen,
}

impl ClaimOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimOutcome::Claimed => "claimed",
            ClaimOutcome::AlreadyClaimed => "already_claimed",
            ClaimOutcome::NotOpen => "not_open",
        }
    }

    /// Outcome for a claim against an order that is no longer open.
    fn for_closed(order: &Order) -> Self {
        if order.status.holds_courier() {
            ClaimOutcome::AlreadyClaimed
        } else {
            ClaimOutcome::NotOpen
        }
    }
}

#[derive(Clone)]
pub struct ClaimArbiter {
    ledger: OrderLedger,
    registry: CourierRegistry,
    window: BroadcastWindow,
}

impl ClaimArbiter {
    pub fn new(ledger: OrderLedger, registry: CourierRegistry, window: BroadcastWindow) -> Self {
        Self {
            ledger,
            registry,
            window,
        }
    }

    /// Admits at most one courier per order.
    ///
    /// Safe to re-issue after `ClaimIndeterminate`, and safe to run twice
    /// concurrently for the same courier: a courier that already won gets
    /// `AlreadyClaimed`, and a reservation left by an earlier attempt is
    /// taken over rather than cleared.
    pub fn claim(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DispatchError> {
        let order = self.ledger.get(order_id)?;

        if order.courier_id == Some(courier_id) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        if !self.window.is_open(&order, now) {
            self.release_abandoned(&order, courier_id, now);
            let outcome = ClaimOutcome::for_closed(&order);
            debug!(order_id = %order_id, courier_id = %courier_id, outcome = outcome.as_str(), "claim rejected");
            return Ok(outcome);
        }

        let revision = self
            .registry
            .reserve(courier_id, order_id, now)
            .map_err(|err| self.indeterminate(order_id, courier_id, err))?
            .ok_or(DispatchError::CourierBusy(courier_id))?;

        match self
            .ledger
            .transition_from(&order, OrderEvent::Claim { courier_id }, now)
        {
            Ok(CasOutcome::Applied(_)) => Ok(ClaimOutcome::Claimed),
            // A concurrent attempt by the same courier won; the reservation is theirs.
            Ok(CasOutcome::Stale(current)) if current.courier_id == Some(courier_id) => {
                debug!(order_id = %order_id, courier_id = %courier_id, "claim already won by a concurrent attempt");
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Ok(CasOutcome::Stale(current)) => {
                self.release_reservation(order_id, courier_id, revision, now);
                let outcome = ClaimOutcome::for_closed(&current);
                debug!(order_id = %order_id, courier_id = %courier_id, outcome = outcome.as_str(), "claim lost race");
                Ok(outcome)
            }
            // The write may or may not have landed; leave the reservation for
            // the retry to take over.
            Err(DispatchError::Storage(err)) => Err(self.indeterminate(order_id, courier_id, err.into())),
            Err(err) => {
                self.release_reservation(order_id, courier_id, revision, now);
                Err(err)
            }
        }
    }

    fn release_reservation(&self, order_id: Uuid, courier_id: Uuid, revision: u64, now: DateTime<Utc>) {
        if let Err(err) = self
            .registry
            .release_reservation(courier_id, order_id, revision, now)
        {
            // The sweeper repairs reservations that outlive their claim.
            warn!(order_id = %order_id, courier_id = %courier_id, error = %err, "failed to release courier reservation");
        }
    }

    /// A closed order can no longer be claimed, so a reservation this courier
    /// left on it from an indeterminate attempt is cleared here instead of
    /// waiting for the sweeper.
    fn release_abandoned(&self, order: &Order, courier_id: Uuid, now: DateTime<Utc>) {
        match self
            .registry
            .release_abandoned(courier_id, order, RESERVATION_GRACE, now)
        {
            Ok(true) => {
                warn!(order_id = %order.id, courier_id = %courier_id, "released reservation left by an earlier attempt");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(order_id = %order.id, courier_id = %courier_id, error = %err, "failed to release courier reservation");
            }
        }
    }

    fn indeterminate(&self, order_id: Uuid, courier_id: Uuid, err: DispatchError) -> DispatchError {
        match err {
            DispatchError::Storage(cause) => {
                warn!(order_id = %order_id, courier_id = %courier_id, error = %cause, "claim indeterminate");
                DispatchError::ClaimIndeterminate {
                    order_id,
                    courier_id,
                }
            }
            other => other,
        }
    }
}
