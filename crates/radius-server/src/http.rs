// SPDX-License-Identifier: AGPL-3.0-only
//! Health probes and Prometheus scrape endpoint.

use crate::metrics::metrics;
use crate::sessions::SessionRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Probe state shared with `main`. Ready flips once both UDP listeners are
/// bound; alive drops during shutdown.
#[derive(Clone)]
pub struct ServerState {
    ready: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    registry: Arc<SessionRegistry>,
}

impl ServerState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(true)),
            registry,
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct ProbeResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_sessions: Option<usize>,
}

fn probe(code: StatusCode, status: &'static str) -> Response {
    (
        code,
        Json(ProbeResponse {
            status,
            active_sessions: None,
        }),
    )
        .into_response()
}

async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let active_sessions = state.registry.len().await;
    (
        StatusCode::OK,
        Json(ProbeResponse {
            status: "healthy",
            active_sessions: Some(active_sessions),
        }),
    )
}

async fn ready_handler(State(state): State<ServerState>) -> Response {
    match (state.is_ready(), state.is_alive()) {
        (true, _) => probe(StatusCode::OK, "ready"),
        (false, true) => probe(StatusCode::SERVICE_UNAVAILABLE, "starting"),
        (false, false) => probe(StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
    }
}

async fn live_handler(State(state): State<ServerState>) -> Response {
    if state.is_alive() {
        probe(StatusCode::OK, "alive")
    } else {
        probe(StatusCode::SERVICE_UNAVAILABLE, "dead")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics().encode(),
    )
}

fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn serve_http(addr: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    let app = build_router(state).layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server listening for health checks and metrics");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
        return Err(e.into());
    }
    Ok(())
}
