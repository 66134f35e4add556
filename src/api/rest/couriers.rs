use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::courier::Courier;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/eligible", get(list_eligible))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/availability", patch(set_availability))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let courier = state.engine.register_courier(name.to_string())?;
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(state.engine.list_couriers()?))
}

async fn list_eligible(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Uuid>>, AppError> {
    Ok(Json(state.engine.list_eligible()?))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(state.engine.courier(id)?))
}

async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state.engine.set_available(&actor, id, payload.available)?;
    Ok(Json(courier))
}
