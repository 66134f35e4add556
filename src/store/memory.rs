use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::courier::Courier;
use crate::models::order::{Order, OrderStamp};
use crate::store::{CasOutcome, DispatchStore, StoreError};

/// In-process store. Each conditional write holds the record's shard lock
/// across the compare and the write.
#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<Uuid, Order>,
    couriers: DashMap<Uuid, Courier>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchStore for MemoryStore {
    fn insert_order(&self, order: Order) -> Result<(), StoreError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                kind: "order",
                id: order.id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    fn orders(&self) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn cas_order(&self, expected: OrderStamp, next: Order) -> Result<CasOutcome<Order>, StoreError> {
        let mut current = self.orders.get_mut(&next.id).ok_or(StoreError::Missing {
            kind: "order",
            id: next.id,
        })?;

        if current.stamp() != expected {
            return Ok(CasOutcome::Stale(current.clone()));
        }

        *current = next.clone();
        Ok(CasOutcome::Applied(next))
    }

    fn insert_courier(&self, courier: Courier) -> Result<(), StoreError> {
        match self.couriers.entry(courier.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                kind: "courier",
                id: courier.id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(courier);
                Ok(())
            }
        }
    }

    fn courier(&self, id: Uuid) -> Result<Option<Courier>, StoreError> {
        Ok(self.couriers.get(&id).map(|entry| entry.value().clone()))
    }

    fn couriers(&self) -> Result<Vec<Courier>, StoreError> {
        Ok(self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn cas_courier(
        &self,
        expected_revision: u64,
        next: Courier,
    ) -> Result<CasOutcome<Courier>, StoreError> {
        let mut current = self.couriers.get_mut(&next.id).ok_or(StoreError::Missing {
            kind: "courier",
            id: next.id,
        })?;

        if current.revision != expected_revision {
            return Ok(CasOutcome::Stale(current.clone()));
        }

        *current = next.clone();
        Ok(CasOutcome::Applied(next))
    }
}
