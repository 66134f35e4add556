use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::actor::acting_courier;
use crate::engine::arbiter::ClaimOutcome;
use crate::engine::window::BroadcastStatus;
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/confirm", post(confirm_order))
        .route("/orders/:id/preparing", post(start_preparing))
        .route("/orders/:id/ready", post(mark_ready))
        .route("/orders/:id/claim", post(attempt_claim))
        .route("/orders/:id/claim/confirm", post(confirm_claim))
        .route("/orders/:id/claim/release", post(release_claim))
        .route("/orders/:id/manual-assign", post(manual_assign))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/deliver", post(mark_delivered))
        .route("/orders/:id/broadcast", get(broadcast_status))
        .route("/broadcasts", get(open_broadcasts))
}

#[derive(Deserialize, Default)]
pub struct CreateOrderRequest {
    pub restaurant_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct ManualAssignRequest {
    pub courier_id: Uuid,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub outcome: ClaimOutcome,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let restaurant_id = match (payload.restaurant_id, actor) {
        (Some(id), _) => id,
        (None, Actor::Restaurant(id)) => id,
        (None, _) => {
            return Err(AppError::BadRequest(
                "restaurant_id is required".to_string(),
            ));
        }
    };

    Ok(Json(state.engine.create_order(&actor, restaurant_id)?))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    Ok(Json(state.engine.list_orders(status)?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.get_order(id)?))
}

async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.confirm_order(&actor, id)?))
}

async fn start_preparing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.start_preparing(&actor, id)?))
}

async fn mark_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.mark_ready(&actor, id)?))
}

async fn attempt_claim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<ClaimResponse>, AppError> {
    let courier_id = acting_courier(&actor)?;
    let outcome = state.engine.attempt_claim(&actor, id, courier_id)?;

    Ok(Json(ClaimResponse {
        order_id: id,
        courier_id,
        outcome,
    }))
}

async fn confirm_claim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    let courier_id = acting_courier(&actor)?;
    Ok(Json(state.engine.confirm_claim(&actor, id, courier_id)?))
}

async fn release_claim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    let courier_id = acting_courier(&actor)?;
    Ok(Json(state.engine.release_claim(&actor, id, courier_id)?))
}

async fn manual_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<ManualAssignRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .engine
            .manual_assign(&actor, id, payload.courier_id)?,
    ))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.engine.cancel(&actor, id)?))
}

async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    let courier_id = acting_courier(&actor)?;
    Ok(Json(state.engine.mark_delivered(&actor, id, courier_id)?))
}

async fn broadcast_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BroadcastStatus>, AppError> {
    Ok(Json(state.engine.get_broadcast_status(id)?))
}

async fn open_broadcasts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BroadcastStatus>>, AppError> {
    Ok(Json(state.engine.list_open_broadcasts()?))
}
