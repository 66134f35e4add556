use std::sync::Arc;

use courier_dispatch::api;
use courier_dispatch::config::{Config, LogFormat};
use courier_dispatch::engine::sweeper::run_expiry_sweeper;
use courier_dispatch::error::AppError;
use courier_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let shared_state = Arc::new(AppState::new(
        config.broadcast_timeout,
        config.event_buffer_size,
    ));

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_expiry_sweeper(
        shared_state.clone(),
        config.sweep_interval,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        broadcast_timeout_secs = config.broadcast_timeout.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
