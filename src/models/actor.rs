use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::order::Order;

/// The already-authenticated caller of a dispatch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Restaurant(Uuid),
    Courier(Uuid),
    Staff,
}

impl Actor {
    pub fn role(&self) -> &'static str {
        match self {
            Actor::Restaurant(_) => "restaurant",
            Actor::Courier(_) => "courier",
            Actor::Staff => "staff",
        }
    }

    /// Restaurant-side operations: the owning restaurant or regional staff.
    pub fn require_restaurant(&self, restaurant_id: Uuid) -> Result<(), DispatchError> {
        match self {
            Actor::Restaurant(id) if *id == restaurant_id => Ok(()),
            Actor::Staff => Ok(()),
            other => Err(DispatchError::Forbidden(format!(
                "{} may not act for restaurant {restaurant_id}",
                other.role()
            ))),
        }
    }

    pub fn require_order_owner(&self, order: &Order) -> Result<(), DispatchError> {
        self.require_restaurant(order.restaurant_id)
    }

    /// Courier-side operations: only the courier themself.
    pub fn require_courier(&self, courier_id: Uuid) -> Result<(), DispatchError> {
        match self {
            Actor::Courier(id) if *id == courier_id => Ok(()),
            other => Err(DispatchError::Forbidden(format!(
                "{} may not act as courier {courier_id}",
                other.role()
            ))),
        }
    }

    pub fn require_courier_or_staff(&self, courier_id: Uuid) -> Result<(), DispatchError> {
        match self {
            Actor::Staff => Ok(()),
            _ => self.require_courier(courier_id),
        }
    }
}
