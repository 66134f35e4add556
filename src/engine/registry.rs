use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::courier::Courier;
use crate::models::order::{Order, OrderStatus};
use crate::store::{CasOutcome, DispatchStore, StoreError};

const MAX_CAS_ATTEMPTS: usize = 16;

/// How long a reservation on a still-bindable order must sit untouched
/// before it is treated as left behind by a failed attempt.
pub const RESERVATION_GRACE: Duration = Duration::from_secs(10);

/// Courier records and their claim eligibility.
#[derive(Clone)]
pub struct CourierRegistry {
    store: Arc<dyn DispatchStore>,
}

impl CourierRegistry {
    pub fn new(store: Arc<dyn DispatchStore>) -> Self {
        Self { store }
    }

    pub fn register(&self, name: String, now: DateTime<Utc>) -> Result<Courier, DispatchError> {
        let courier = Courier::new(name, now);
        self.store.insert_courier(courier.clone())?;
        Ok(courier)
    }

    pub fn get(&self, id: Uuid) -> Result<Courier, DispatchError> {
        self.store
            .courier(id)?
            .ok_or(DispatchError::CourierNotFound(id))
    }

    pub fn list(&self) -> Result<Vec<Courier>, DispatchError> {
        Ok(self.store.couriers()?)
    }

    /// Couriers that should hear about a new broadcast.
    pub fn list_eligible(&self) -> Result<Vec<Uuid>, DispatchError> {
        let mut eligible: Vec<Uuid> = self
            .store
            .couriers()?
            .into_iter()
            .filter(Courier::is_eligible)
            .map(|courier| courier.id)
            .collect();
        eligible.sort();
        Ok(eligible)
    }

    /// Going offline is always allowed; coming online requires no active order.
    pub fn set_available(
        &self,
        id: Uuid,
        available: bool,
        now: DateTime<Utc>,
    ) -> Result<Courier, DispatchError> {
        self.modify(id, now, |courier| {
            if available && courier.active_order_id.is_some() {
                return Err(DispatchError::CourierBusy(courier.id));
            }
            if courier.is_available == available {
                return Ok(false);
            }
            courier.is_available = available;
            Ok(true)
        })
    }

    /// Points the courier at `order_id` and returns the revision that holds
    /// the reservation, or `None` when the courier is unavailable or holds a
    /// different order.
    ///
    /// A reservation already on `order_id` is taken over: the write bumps the
    /// revision, so the attempt that made it can no longer release it.
    pub fn reserve(
        &self,
        id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, DispatchError> {
        let mut reserved = false;
        let courier = self.modify(id, now, |courier| {
            reserved = courier.is_available
                && courier
                    .active_order_id
                    .is_none_or(|held| held == order_id);
            if reserved {
                courier.active_order_id = Some(order_id);
            }
            Ok(reserved)
        })?;
        Ok(reserved.then_some(courier.revision))
    }

    /// Clears the courier's active order, but only while it still points at
    /// `order_id`. Returns whether anything was cleared.
    ///
    /// Only safe once `order_id` can no longer be bound, i.e. it is cancelled
    /// or delivered.
    pub fn release(
        &self,
        id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        let mut released = false;
        self.modify(id, now, |courier| {
            released = courier.active_order_id == Some(order_id);
            if released {
                courier.active_order_id = None;
            }
            Ok(released)
        })?;
        Ok(released)
    }

    /// Clears a reservation made at `revision`. A courier record written
    /// since then, by a concurrent attempt or anything else, is left alone.
    pub fn release_reservation(
        &self,
        id: Uuid,
        order_id: Uuid,
        revision: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        let mut released = false;
        self.modify(id, now, |courier| {
            released = courier.revision == revision && courier.active_order_id == Some(order_id);
            if released {
                courier.active_order_id = None;
            }
            Ok(released)
        })?;
        Ok(released)
    }

    /// Clears a reservation on `order` that no attempt will turn into a
    /// binding.
    ///
    /// While the order can still be bound (broadcasting or awaiting manual
    /// assignment) an in-flight attempt may own the reservation, so it is
    /// only cleared once the courier record has sat untouched for `grace`.
    pub fn release_abandoned(
        &self,
        id: Uuid,
        order: &Order,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        if order.status.is_live_assignment() && order.courier_id == Some(id) {
            return Ok(false);
        }
        let bindable = matches!(
            order.status,
            OrderStatus::ReadyBroadcasting | OrderStatus::ExpiredAwaitingManual
        );

        let mut released = false;
        self.modify(id, now, |courier| {
            let idle = (now - courier.updated_at)
                .to_std()
                .is_ok_and(|age| age >= grace);
            released = courier.active_order_id == Some(order.id) && (!bindable || idle);
            if released {
                courier.active_order_id = None;
            }
            Ok(released)
        })?;
        Ok(released)
    }

    /// Read-modify-conditional-write loop. `change` returns whether it
    /// modified the record; unchanged records are not written.
    fn modify<F>(&self, id: Uuid, now: DateTime<Utc>, mut change: F) -> Result<Courier, DispatchError>
    where
        F: FnMut(&mut Courier) -> Result<bool, DispatchError>,
    {
        let mut current = self.get(id)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut next = current.clone();
            if !change(&mut next)? {
                return Ok(current);
            }
            next.revision = current.revision + 1;
            next.updated_at = now;

            match self.store.cas_courier(current.revision, next)? {
                CasOutcome::Applied(applied) => return Ok(applied),
                CasOutcome::Stale(latest) => current = latest,
            }
        }

        Err(DispatchError::Storage(StoreError::Unavailable(format!(
            "courier {id} kept changing"
        ))))
    }
}
