use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::arbiter::{ClaimArbiter, ClaimOutcome};
use crate::engine::ledger::{OrderEvent, OrderLedger, Transitioned};
use crate::engine::registry::{CourierRegistry, RESERVATION_GRACE};
use crate::engine::window::{BroadcastStatus, BroadcastWindow};
use crate::error::DispatchError;
use crate::models::actor::Actor;
use crate::models::courier::Courier;
use crate::models::event::NotificationKind;
use crate::models::order::{Order, OrderStatus};
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;
use crate::store::{CasOutcome, DispatchStore};

/// Entry point for every dispatch operation.
///
/// All binding and unbinding of couriers to orders goes through here, so
/// the `Order.courier_id` <-> `Courier.active_order_id` pairing is never
/// written from one side only.
pub struct DispatchEngine {
    ledger: OrderLedger,
    registry: CourierRegistry,
    window: BroadcastWindow,
    arbiter: ClaimArbiter,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        window: BroadcastWindow,
        metrics: Metrics,
    ) -> Self {
        let ledger = OrderLedger::new(store.clone());
        let registry = CourierRegistry::new(store);
        let arbiter = ClaimArbiter::new(ledger.clone(), registry.clone(), window);

        Self {
            ledger,
            registry,
            window,
            arbiter,
            clock,
            notifier,
            metrics,
        }
    }


    pub fn create_order(&self, actor: &Actor, restaurant_id: Uuid) -> Result<Order, DispatchError> {
        actor.require_restaurant(restaurant_id)?;
        let order = self.ledger.create(Order::new(restaurant_id, self.clock.now()))?;
        info!(order_id = %order.id, restaurant_id = %restaurant_id, "order created");
        Ok(order)
    }

    pub fn confirm_order(&self, actor: &Actor, order_id: Uuid) -> Result<Order, DispatchError> {
        let transitioned = self.restaurant_transition(actor, order_id, OrderEvent::Confirm)?;
        Ok(transitioned.current)
    }

    pub fn start_preparing(&self, actor: &Actor, order_id: Uuid) -> Result<Order, DispatchError> {
        let transitioned = self.restaurant_transition(actor, order_id, OrderEvent::StartPreparing)?;
        Ok(transitioned.current)
    }


    /// Opens the broadcast window and tells every eligible courier.
    pub fn mark_ready(&self, actor: &Actor, order_id: Uuid) -> Result<Order, DispatchError> {
        let transitioned = self.restaurant_transition(actor, order_id, OrderEvent::MarkReady)?;
        let eligible = self.eligible_for_notification();

        self.metrics.broadcasts_opened_total.inc();
        info!(
            order_id = %order_id,
            couriers = eligible.len(),
            timeout_secs = self.window.timeout().as_secs(),
            "order ready; broadcast opened"
        );
        self.notifier
            .notify(&eligible, order_id, NotificationKind::NewReadyOrder);

        Ok(transitioned.current)
    }

    pub fn attempt_claim(
        &self,
        actor: &Actor,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<ClaimOutcome, DispatchError> {
        actor.require_courier(courier_id)?;

        let started = Instant::now();
        let now = self.clock.now();
        self.expire_if_elapsed(order_id, now)?;

        let result = self.arbiter.claim(order_id, courier_id, now);
        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(err) => err.code(),
        };
        self.metrics
            .observe_claim(label, started.elapsed().as_secs_f64());

        if let Ok(ClaimOutcome::Claimed) = result {
            info!(order_id = %order_id, courier_id = %courier_id, "order claimed; awaiting courier confirmation");
            // No courier recipients: this one is for the restaurant view.
            self.notifier
                .notify(&[], order_id, NotificationKind::ClaimPending);

            let others = self.eligible_for_notification();
            if !others.is_empty() {
                self.notifier
                    .notify(&others, order_id, NotificationKind::ClaimWithdrawn);
            }
        }

        result
    }

    pub fn confirm_claim(
        &self,
        actor: &Actor,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<Order, DispatchError> {
        actor.require_courier(courier_id)?;

        let transitioned =
            self.ledger
                .transition(order_id, OrderEvent::ConfirmClaim { courier_id }, self.clock.now())?;

        info!(order_id = %order_id, courier_id = %courier_id, "claim confirmed; order assigned");
        self.notifier
            .notify(&[courier_id], order_id, NotificationKind::Assigned);

        Ok(transitioned.current)
    }

    /// The bound courier backs out before confirming. The order goes back on
    /// the network with its original window, or straight to the manual queue
    /// if that window has already run out.
    pub fn release_claim(
        &self,
        actor: &Actor,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<Order, DispatchError> {
        actor.require_courier(courier_id)?;

        let now = self.clock.now();
        let held = self.registry.get(courier_id)?;
        let transitioned =
            self.ledger
                .transition(order_id, OrderEvent::ReleaseClaim { courier_id }, now)?;
        // A re-claim by the same courier can land in between; it bumps the
        // revision and keeps its binding.
        self.release_reservation(courier_id, order_id, held.revision, now);

        info!(order_id = %order_id, courier_id = %courier_id, "claim released");

        let order = self.refresh(transitioned.current, now)?;
        if order.status == OrderStatus::ReadyBroadcasting {
            let eligible = self.eligible_for_notification();
            self.notifier
                .notify(&eligible, order_id, NotificationKind::NewReadyOrder);
        }

        Ok(order)
    }

    /// Restaurant fallback once a broadcast expired unclaimed. There is a
    /// single authoritative caller, so no arbitration, but the bind still
    /// goes through the same conditional writes as a claim.
    pub fn manual_assign(
        &self,
        actor: &Actor,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<Order, DispatchError> {
        let now = self.clock.now();
        let order = self.ledger.get(order_id)?;
        actor.require_order_owner(&order)?;

        let order = self.refresh(order, now)?;
        let event = OrderEvent::ManualAssign { courier_id };
        if order.status != OrderStatus::ExpiredAwaitingManual {
            return Err(DispatchError::InvalidTransition {
                order_id,
                from: order.status,
                event: event.name(),
            });
        }

        let revision = self
            .registry
            .reserve(courier_id, order_id, now)?
            .ok_or(DispatchError::CourierBusy(courier_id))?;

        match self.ledger.transition_from(&order, event, now) {
            Ok(CasOutcome::Applied(assigned)) => {
                self.metrics.manual_assignments_total.inc();
                info!(order_id = %order_id, courier_id = %courier_id, "order manually assigned");
                self.notifier
                    .notify(&[courier_id], order_id, NotificationKind::Assigned);
                Ok(assigned)
            }
            Ok(CasOutcome::Stale(current)) => {
                // A concurrent assignment of the same courier owns the reservation.
                if current.courier_id != Some(courier_id) {
                    self.release_reservation(courier_id, order_id, revision, now);
                }
                Err(DispatchError::InvalidTransition {
                    order_id,
                    from: current.status,
                    event: event.name(),
                })
            }
            Err(err @ DispatchError::Storage(_)) => Err(err),
            Err(err) => {
                self.release_reservation(courier_id, order_id, revision, now);
                Err(err)
            }
        }
    }

    /// Idempotent: cancelling a cancelled order returns it unchanged.
    pub fn cancel(&self, actor: &Actor, order_id: Uuid) -> Result<Order, DispatchError> {
        let order = self.ledger.get(order_id)?;
        actor.require_order_owner(&order)?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let now = self.clock.now();
        let transitioned = match self.ledger.transition(order_id, OrderEvent::Cancel, now) {
            Ok(transitioned) => transitioned,
            Err(DispatchError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            }) => return self.ledger.get(order_id),
            Err(err) => return Err(err),
        };

        let mut recipients = Vec::new();
        if let Some(courier_id) = transitioned.previous.courier_id {
            self.unbind_courier(courier_id, order_id, now);
            recipients.push(courier_id);
        }
        if transitioned.previous.status == OrderStatus::ReadyBroadcasting {
            recipients.extend(self.eligible_for_notification());
        }

        self.metrics.cancellations_total.inc();
        info!(
            order_id = %order_id,
            from = %transitioned.previous.status,
            "order cancelled"
        );
        self.notifier
            .notify(&recipients, order_id, NotificationKind::Cancelled);

        Ok(transitioned.current)
    }

    /// Completes the delivery and frees the courier. Availability is left
    /// for the courier to switch back on.
    pub fn mark_delivered(
        &self,
        actor: &Actor,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<Order, DispatchError> {
        actor.require_courier(courier_id)?;

        let now = self.clock.now();
        let transitioned =
            self.ledger
                .transition(order_id, OrderEvent::Deliver { courier_id }, now)?;
        self.unbind_courier(courier_id, order_id, now);

        info!(order_id = %order_id, courier_id = %courier_id, "order delivered");
        self.notifier
            .notify(&[], order_id, NotificationKind::Delivered);

        Ok(transitioned.current)
    }

    /// One sweep pass: expires elapsed broadcasts and clears courier
    /// reservations that no longer match any binding.
    pub fn tick(&self) -> Result<Vec<Uuid>, DispatchError> {
        let now = self.clock.now();

        let expired = self.window.sweep_expired(&self.ledger, now)?;
        for order_id in &expired {
            self.on_expired(*order_id);
        }

        let repaired = self.repair_reservations(now)?;
        if repaired > 0 {
            warn!(couriers = repaired, "released dangling courier reservations");
        }

        let open = self
            .ledger
            .list()?
            .iter()
            .filter(|order| self.window.is_open(order, now))
            .count();
        self.metrics
            .open_broadcasts
            .set(i64::try_from(open).unwrap_or(i64::MAX));

        Ok(expired)
    }


    pub fn register_courier(&self, name: String) -> Result<Courier, DispatchError> {
        let courier = self.registry.register(name, self.clock.now())?;
        info!(courier_id = %courier.id, "courier registered");
        Ok(courier)
    }

    pub fn set_available(
        &self,
        actor: &Actor,
        courier_id: Uuid,
        available: bool,
    ) -> Result<Courier, DispatchError> {
        actor.require_courier_or_staff(courier_id)?;
        let courier = self
            .registry
            .set_available(courier_id, available, self.clock.now())?;
        info!(courier_id = %courier_id, available, "courier availability changed");
        Ok(courier)
    }

    pub fn courier(&self, courier_id: Uuid) -> Result<Courier, DispatchError> {
        self.registry.get(courier_id)
    }

    pub fn list_couriers(&self) -> Result<Vec<Courier>, DispatchError> {
        let mut couriers = self.registry.list()?;
        couriers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(couriers)
    }

    pub fn list_eligible(&self) -> Result<Vec<Uuid>, DispatchError> {
        self.registry.list_eligible()
    }


    pub fn get_order(&self, order_id: Uuid) -> Result<Order, DispatchError> {
        self.expire_if_elapsed(order_id, self.clock.now())
    }

    pub fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, DispatchError> {
        let now = self.clock.now();
        let mut orders = Vec::new();

        for order in self.ledger.list()? {
            let order = self.refresh(order, now)?;
            if status.is_none_or(|wanted| order.status == wanted) {
                orders.push(order);
            }
        }

        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    /// Advisory countdown for displays. Correctness never depends on it.
    pub fn get_broadcast_status(&self, order_id: Uuid) -> Result<BroadcastStatus, DispatchError> {
        let now = self.clock.now();
        let order = self.expire_if_elapsed(order_id, now)?;
        Ok(self.window.status(&order, now))
    }

    /// Orders a courier could claim right now, soonest to close first.
    pub fn list_open_broadcasts(&self) -> Result<Vec<BroadcastStatus>, DispatchError> {
        let now = self.clock.now();
        let mut open: Vec<BroadcastStatus> = self
            .ledger
            .list()?
            .iter()
            .filter(|order| self.window.is_open(order, now))
            .map(|order| self.window.status(order, now))
            .collect();

        open.sort_by_key(|status| (status.remaining_ms, status.order_id));
        Ok(open)
    }


    fn restaurant_transition(
        &self,
        actor: &Actor,
        order_id: Uuid,
        event: OrderEvent,
    ) -> Result<Transitioned, DispatchError> {
        let order = self.ledger.get(order_id)?;
        actor.require_order_owner(&order)?;

        let transitioned = self.ledger.transition(order_id, event, self.clock.now())?;
        info!(
            order_id = %order_id,
            from = %transitioned.previous.status,
            to = %transitioned.current.status,
            "order transitioned"
        );
        Ok(transitioned)
    }

    fn expire_if_elapsed(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<Order, DispatchError> {
        let order = self.ledger.get(order_id)?;
        self.refresh(order, now)
    }

    /// Lazy expiry on access; the sweeper does the same in bulk.
    fn refresh(&self, order: Order, now: DateTime<Utc>) -> Result<Order, DispatchError> {
        if self.window.expire(&self.ledger, &order, now)? {
            self.on_expired(order.id);
            return self.ledger.get(order.id);
        }
        Ok(order)
    }

    fn on_expired(&self, order_id: Uuid) {
        self.metrics.broadcasts_expired_total.inc();
        info!(order_id = %order_id, "broadcast expired; awaiting manual assignment");

        let eligible = self.eligible_for_notification();
        self.notifier
            .notify(&eligible, order_id, NotificationKind::BroadcastExpired);
    }

    /// Frees the courier from an order that can no longer be bound.
    fn unbind_courier(&self, courier_id: Uuid, order_id: Uuid, now: DateTime<Utc>) {
        if let Err(err) = self.registry.release(courier_id, order_id, now) {
            warn!(order_id = %order_id, courier_id = %courier_id, error = %err, "failed to unbind courier");
        }
    }

    fn release_reservation(&self, courier_id: Uuid, order_id: Uuid, revision: u64, now: DateTime<Utc>) {
        if let Err(err) = self
            .registry
            .release_reservation(courier_id, order_id, revision, now)
        {
            warn!(order_id = %order_id, courier_id = %courier_id, error = %err, "failed to release courier reservation");
        }
    }

    /// Notification recipients are best effort; a failed lookup must not
    /// fail the transition that triggered it.
    fn eligible_for_notification(&self) -> Vec<Uuid> {
        self.registry.list_eligible().unwrap_or_else(|err| {
            warn!(error = %err, "failed to list eligible couriers");
            Vec::new()
        })
    }

    /// Releases courier reservations that no attempt will turn into a
    /// binding. Reservations on an order that can still be bound are given
    /// [`RESERVATION_GRACE`] first, since an in-flight bind may own them.
    fn repair_reservations(&self, now: DateTime<Utc>) -> Result<usize, DispatchError> {
        let mut repaired = 0;

        for courier in self.registry.list()? {
            let Some(order_id) = courier.active_order_id else {
                continue;
            };

            let released = match self.ledger.get(order_id) {
                Ok(order) => {
                    self.registry
                        .release_abandoned(courier.id, &order, RESERVATION_GRACE, now)?
                }
                Err(DispatchError::OrderNotFound(_)) => {
                    self.registry.release(courier.id, order_id, now)?
                }
                Err(err) => return Err(err),
            };

            if released {
                warn!(courier_id = %courier.id, order_id = %order_id, "released dangling reservation");
                repaired += 1;
            }
        }

        Ok(repaired)
    }
}
