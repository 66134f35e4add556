use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Confirmed,
    Preparing,
    ReadyBroadcasting,
    ReadyClaimedPending,
    Assigned,
    ExpiredAwaitingManual,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Statuses in which `courier_id` must be set.
    pub fn holds_courier(self) -> bool {
        matches!(
            self,
            OrderStatus::ReadyClaimedPending | OrderStatus::Assigned | OrderStatus::Delivered
        )
    }

    /// Statuses in which the bound courier's `active_order_id` points back at the order.
    pub fn is_live_assignment(self) -> bool {
        matches!(
            self,
            OrderStatus::ReadyClaimedPending | OrderStatus::Assigned
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyBroadcasting => "ready_broadcasting",
            OrderStatus::ReadyClaimedPending => "ready_claimed_pending",
            OrderStatus::Assigned => "assigned",
            OrderStatus::ExpiredAwaitingManual => "expired_awaiting_manual",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "created" => OrderStatus::Created,
            "confirmed" => OrderStatus::Confirmed,
            "preparing" => OrderStatus::Preparing,
            "ready_broadcasting" => OrderStatus::ReadyBroadcasting,
            "ready_claimed_pending" => OrderStatus::ReadyClaimedPending,
            "assigned" => OrderStatus::Assigned,
            "expired_awaiting_manual" => OrderStatus::ExpiredAwaitingManual,
            "delivered" => OrderStatus::Delivered,
            "cancelled" => OrderStatus::Cancelled,
            other => return Err(format!("unknown order status: {other}")),
        };
        Ok(status)
    }
}

/// Optimistic-concurrency token for an order record.
///
/// Every accepted transition changes the status, and every assignment-affecting
/// one also bumps the version, so a matching stamp means nobody else has
/// written the record since it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderStamp {
    pub status: OrderStatus,
    pub assignment_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub status: OrderStatus,
    pub ready_at: Option<DateTime<Utc>>,
    pub courier_id: Option<Uuid>,
    pub assignment_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(restaurant_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            restaurant_id,
            status: OrderStatus::Created,
            ready_at: None,
            courier_id: None,
            assignment_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stamp(&self) -> OrderStamp {
        OrderStamp {
            status: self.status,
            assignment_version: self.assignment_version,
        }
    }
}
