use std::sync::Arc;
use std::time::{Duration, Instant};

use authority_core::CommandRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, ClientMessage, ConnectionId, ErrorCode, Role, ScheduleEventRequest, ServerMessage,
    WeatherOverride,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::persistence::{PersistenceError, SqliteStore};
use crate::router::{ConnectionDirectory, EffectRouter, Outbound};
use crate::session::{resolve_identity, AdmissionError, Identity, TokenSigner};
use crate::settings::{ServerSettings, SettingsError};
use crate::workers::{spawn_economy_worker, spawn_persist_worker};
use crate::metrics::ServerMetrics;
use crate::{AuthorityRuntime, EVICTION_NOTICE};

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

include!("error.rs");
include!("state.rs");
include!("routes/socket.rs");
include!("routes/admin.rs");
include!("driver.rs");
include!("util.rs");

/// Runs the authority until ctrl-c, then drains the background workers.
pub async fn serve(settings: ServerSettings) -> Result<(), ServerError> {
    if settings.uses_dev_secret() {
        warn!("AUTHORITY_TOKEN_SECRET is not set; using the development secret");
    }
    let store = Arc::new(SqliteStore::open(&settings.sqlite_path)?);
    let collaborators = Collaborators::from_backend(store);

    let directory = Arc::new(ConnectionDirectory::new());
    let (persist_tx, persist_worker) = spawn_persist_worker(
        collaborators.store.clone(),
        settings.config.persist_throttle_ms,
        settings.config.environment_persist_throttle_ms,
    );
    let (economy_tx, economy_worker) =
        spawn_economy_worker(collaborators.ledger.clone(), directory.clone());
    let effect_router = EffectRouter::new(directory, persist_tx, economy_tx);

    let state = AppState::new(&settings, collaborators, effect_router);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(run_tick_driver(state.clone(), shutdown_rx));

    let listener = TcpListener::bind(settings.addr).await?;
    info!(addr = %settings.addr, sqlite = %settings.sqlite_path, "authority listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Ok(ticks) = driver.await {
        info!(ticks, "tick driver stopped");
    }

    // The driver held the last router clone; the workers now see closed
    // channels and finish their queues.
    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, async {
        (persist_worker.await, economy_worker.await)
    })
    .await
    {
        Ok((Ok(persisted), Ok(economy))) => info!(
            written = persisted.written,
            skipped = persisted.skipped,
            failed = persisted.failed,
            charges = economy.applied,
            "workers drained"
        ),
        Ok(_) => warn!("a background worker panicked during shutdown"),
        Err(_) => warn!("background workers did not drain in time"),
    }

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/metrics", get(server_metrics))
        .route("/api/v1/spaces/{space_id}/status", get(space_status))
        .route("/api/v1/spaces/{space_id}/socket", get(open_socket))
        .route("/api/v1/spaces/{space_id}/rules/refresh", post(refresh_rules))
        .route("/api/v1/spaces/{space_id}/environment", post(override_weather))
        .route(
            "/api/v1/spaces/{space_id}/environment/events",
            post(schedule_event),
        )
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests;
