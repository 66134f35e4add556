use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewReadyOrder,
    ClaimPending,
    ClaimWithdrawn,
    BroadcastExpired,
    Assigned,
    Cancelled,
    Delivered,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::NewReadyOrder => "new_ready_order",
            NotificationKind::ClaimPending => "claim_pending",
            NotificationKind::ClaimWithdrawn => "claim_withdrawn",
            NotificationKind::BroadcastExpired => "broadcast_expired",
            NotificationKind::Assigned => "assigned",
            NotificationKind::Cancelled => "cancelled",
            NotificationKind::Delivered => "delivered",
        }
    }
}

/// A state change published to dispatch observers.
///
/// `recipients` lists the couriers the event is addressed to. Events with no
/// recipients are meant for the restaurant view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub order_id: Uuid,
    pub kind: NotificationKind,
    pub recipients: Vec<Uuid>,
    pub at: DateTime<Utc>,
}

impl DispatchEvent {
    pub fn is_addressed_to(&self, courier_id: &Uuid) -> bool {
        self.recipients.contains(courier_id)
    }
}
