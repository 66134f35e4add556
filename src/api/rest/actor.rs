use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::{AppError, DispatchError};
use crate::models::actor::Actor;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ID_HEADER: &str = "x-actor-id";

/// Identity is established upstream; these headers only carry who the
/// caller is and in which role.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = header(parts, ROLE_HEADER)?
            .ok_or_else(|| AppError::BadRequest(format!("missing {ROLE_HEADER} header")))?;

        match role {
            "restaurant" => Ok(Actor::Restaurant(actor_id(parts)?)),
            "courier" => Ok(Actor::Courier(actor_id(parts)?)),
            "staff" => Ok(Actor::Staff),
            other => Err(AppError::BadRequest(format!(
                "unknown role {other}, expected restaurant/courier/staff"
            ))),
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::BadRequest(format!("{name} is not valid text")))
        })
        .transpose()
}

fn actor_id(parts: &Parts) -> Result<Uuid, AppError> {
    let raw = header(parts, ID_HEADER)?
        .ok_or_else(|| AppError::BadRequest(format!("missing {ID_HEADER} header")))?;
    Uuid::parse_str(raw).map_err(|err| AppError::BadRequest(format!("invalid {ID_HEADER}: {err}")))
}

/// The courier an operation acts for, taken from the caller's identity.
pub fn acting_courier(actor: &Actor) -> Result<Uuid, AppError> {
    match actor {
        Actor::Courier(id) => Ok(*id),
        other => Err(DispatchError::Forbidden(format!(
            "only couriers may do this, caller is {}",
            other.role()
        ))
        .into()),
    }
}
