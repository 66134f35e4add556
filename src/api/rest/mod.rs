pub mod actor;
pub mod couriers;
pub mod orders;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::AppError;
use crate::models::order::OrderStatus;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(couriers::router())
        .merge(orders::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    couriers: usize,
    orders: usize,
    open_broadcasts: usize,
    awaiting_manual: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let orders = state.engine.list_orders(None)?;
    let awaiting_manual = orders
        .iter()
        .filter(|order| order.status == OrderStatus::ExpiredAwaitingManual)
        .count();

    Ok(Json(HealthResponse {
        status: "ok",
        couriers: state.engine.list_couriers()?.len(),
        orders: orders.len(),
        open_broadcasts: state.engine.list_open_broadcasts()?.len(),
        awaiting_manual,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
