//! Broadcast windows.
//!
//! Whether an order is open for claims is derived from `status` and
//! `ready_at` alone, so every process observing the same record reaches the
//! same answer. `remaining` is advisory and only feeds countdown displays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::engine::ledger::{OrderEvent, OrderLedger};
use crate::error::DispatchError;
use crate::models::order::{Order, OrderStatus};

pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BroadcastStatus {
    pub order_id: Uuid,
    pub open: bool,
    pub remaining_ms: u64,
}

impl BroadcastStatus {
    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BroadcastWindow {
    timeout: Duration,
}

impl Default for BroadcastWindow {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_TIMEOUT)
    }
}

impl BroadcastWindow {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn deadline(&self, order: &Order) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.timeout).ok()?;
        order.ready_at?.checked_add_signed(timeout)
    }

    pub fn is_open(&self, order: &Order, now: DateTime<Utc>) -> bool {
        order.status == OrderStatus::ReadyBroadcasting
            && self.deadline(order).is_some_and(|deadline| now < deadline)
    }

    /// Still broadcasting on record, but the window has run out.
    pub fn has_elapsed(&self, order: &Order, now: DateTime<Utc>) -> bool {
        order.status == OrderStatus::ReadyBroadcasting
            && self.deadline(order).is_none_or(|deadline| now >= deadline)
    }

    pub fn remaining(&self, order: &Order, now: DateTime<Utc>) -> Duration {
        if order.status != OrderStatus::ReadyBroadcasting {
            return Duration::ZERO;
        }
        self.deadline(order)
            .and_then(|deadline| (deadline - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    pub fn status(&self, order: &Order, now: DateTime<Utc>) -> BroadcastStatus {
        let remaining = self.remaining(order, now);
        BroadcastStatus {
            order_id: order.id,
            open: self.is_open(order, now),
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Drives every elapsed broadcast into `expired_awaiting_manual`.
    ///
    /// Idempotent: orders that were already expired, or were claimed or
    /// cancelled between the scan and the write, are skipped.
    pub fn sweep_expired(
        &self,
        ledger: &OrderLedger,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DispatchError> {
        let mut expired = Vec::new();

        for order in ledger.list()? {
            if !self.has_elapsed(&order, now) {
                continue;
            }
            match self.expire(ledger, &order, now) {
                Ok(true) => expired.push(order.id),
                Ok(false) => {}
                Err(err) => warn!(order_id = %order.id, error = %err, "failed to expire broadcast"),
            }
        }

        expired.sort();
        Ok(expired)
    }

    /// Expires a single order if its window has elapsed. Returns whether this
    /// call performed the expiry.
    pub fn expire(
        &self,
        ledger: &OrderLedger,
        order: &Order,
        now: DateTime<Utc>,
    ) -> Result<bool, DispatchError> {
        if !self.has_elapsed(order, now) {
            return Ok(false);
        }

        match ledger.transition(order.id, OrderEvent::Expire, now) {
            Ok(_) => Ok(true),
            // Claimed, cancelled or expired by someone else first.
            Err(DispatchError::InvalidTransition { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
