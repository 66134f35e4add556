use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::OrderStatus;
use crate::store::StoreError;

/// Failures of dispatch operations.
///
/// Expected race outcomes of a claim (`AlreadyClaimed`, `NotOpen`) are not
/// errors; see [`crate::engine::arbiter::ClaimOutcome`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("order {order_id} cannot {event} while {from}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        event: &'static str,
    },

    #[error("courier {0} is unavailable or already holds an order")]
    CourierBusy(Uuid),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("claim of order {order_id} by courier {courier_id} is indeterminate; retry the claim")]
    ClaimIndeterminate { order_id: Uuid, courier_id: Uuid },

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("courier {0} not found")]
    CourierNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::CourierBusy(_) => "courier_busy",
            DispatchError::Forbidden(_) => "forbidden",
            DispatchError::ClaimIndeterminate { .. } => "claim_indeterminate",
            DispatchError::OrderNotFound(_) => "order_not_found",
            DispatchError::CourierNotFound(_) => "courier_not_found",
            DispatchError::Storage(_) => "storage",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            DispatchError::InvalidTransition { .. } | DispatchError::CourierBusy(_) => {
                StatusCode::CONFLICT
            }
            DispatchError::Forbidden(_) => StatusCode::FORBIDDEN,
            DispatchError::ClaimIndeterminate { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::OrderNotFound(_) | DispatchError::CourierNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DispatchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            AppError::Dispatch(err) => (err.status(), err.code()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}
