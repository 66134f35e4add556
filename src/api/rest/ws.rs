use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::event::DispatchEvent;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WatchQuery {
    /// Only forward events addressed to this courier.
    pub courier_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WatchQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.courier_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, courier_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = Box::pin(BroadcastStream::new(state.events_tx.subscribe()).filter_map(
        move |result| {
            let forward = match result {
                Ok(event) if wanted(&event, courier_id) => Some(event),
                Ok(_) => None,
                Err(err) => {
                    warn!(error = %err, "websocket subscriber lagged");
                    None
                }
            };
            futures::future::ready(forward)
        },
    ));

    info!(courier_id = ?courier_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize dispatch event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(courier_id = ?courier_id, "websocket client disconnected");
}

fn wanted(event: &DispatchEvent, courier_id: Option<Uuid>) -> bool {
    courier_id.is_none_or(|id| event.is_addressed_to(&id))
}
