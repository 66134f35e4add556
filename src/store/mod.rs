//! Persistence seam for order and courier records.
//!
//! The engine only relies on single-record atomicity: a conditional write
//! that applies when the stored record still matches what the caller read.
//! Cross-record consistency (order <-> courier binding) is built on top of
//! that by the claim arbiter.

pub mod memory;

use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::Courier;
use crate::models::order::{Order, OrderStamp};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    Missing { kind: &'static str, id: Uuid },

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum CasOutcome<T> {
    /// The precondition held and the new record was written.
    Applied(T),
    /// The precondition failed; carries the record as currently stored.
    Stale(T),
}

pub trait DispatchStore: Send + Sync {
    fn insert_order(&self, order: Order) -> Result<(), StoreError>;

    fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    fn orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Replaces the order with `next` only if its current stamp equals `expected`.
    fn cas_order(&self, expected: OrderStamp, next: Order) -> Result<CasOutcome<Order>, StoreError>;

    fn insert_courier(&self, courier: Courier) -> Result<(), StoreError>;

    fn courier(&self, id: Uuid) -> Result<Option<Courier>, StoreError>;

    fn couriers(&self) -> Result<Vec<Courier>, StoreError>;

    /// Replaces the courier with `next` only if its current revision equals `expected_revision`.
    fn cas_courier(
        &self,
        expected_revision: u64,
        next: Courier,
    ) -> Result<CasOutcome<Courier>, StoreError>;
}
