use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub is_available: bool,
    pub active_order_id: Option<Uuid>,
    /// Bumped on every write; the store compares it on conditional updates.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(name: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            is_available: false,
            active_order_id: None,
            revision: 0,
            updated_at: now,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.is_available && self.active_order_id.is_none()
    }
}
