// SPDX-License-Identifier: AGPL-3.0-only
//! HTTP handlers for the management API.

use super::models::*;
use super::rbac::{require_permission, RbacConfig, READ_SESSIONS, READ_STATUS, WRITE_SESSIONS};
use crate::control::SessionControl;
use crate::metrics::metrics;
use crate::sessions::SessionRegistry;
use crate::sweep::ExpirySweep;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use isp_radius_proto::CAUSE_ADMIN_DISCONNECT;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;
use uuid::Uuid;

const AUTH_KINDS: [&str; 3] = ["subscriber", "voucher", "unknown"];

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub control: Arc<SessionControl>,
    pub sweep: Arc<ExpirySweep>,
    pub start_time: SystemTime,
}

impl ApiState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        control: Arc<SessionControl>,
        sweep: Arc<ExpirySweep>,
    ) -> Self {
        Self {
            registry,
            control,
            sweep,
            start_time: SystemTime::now(),
        }
    }
}

pub fn build_api_router(rbac: RbacConfig, state: ApiState) -> Router {
    let status = Router::new()
        .route("/api/v1/status", get(get_status))
        .route_layer(middleware::from_fn(require_permission(&rbac, READ_STATUS)));

    let read = Router::new()
        .route("/api/v1/sessions", get(list_sessions))
        .route("/api/v1/tenants/:tenant/sessions", get(list_tenant_sessions))
        .route(
            "/api/v1/tenants/:tenant/vouchers/:code/sessions",
            get(list_voucher_sessions),
        )
        .route_layer(middleware::from_fn(require_permission(&rbac, READ_SESSIONS)));

    let write = Router::new()
        .route("/api/v1/sessions/:id", delete(disconnect_session))
        .route("/api/v1/sweep", post(run_sweep))
        .route_layer(middleware::from_fn(require_permission(&rbac, WRITE_SESSIONS)));

    status.merge(read).merge(write).with_state(Arc::new(state))
}

/// GET /api/v1/status
async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let m = metrics();
    let total = |result: &str| -> u64 {
        AUTH_KINDS
            .iter()
            .map(|kind| m.auth_requests_total.with_label_values(&[*kind, result]).get() as u64)
            .sum()
    };
    let accepts = total("accept");
    let rejects = total("reject");
    let answered = accepts + rejects;

    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().unwrap_or_default().as_secs(),
        stats: ServerStats {
            active_sessions: state.registry.len().await,
            auth_accepts: accepts,
            auth_rejects: rejects,
            auth_success_rate: if answered == 0 {
                0.0
            } else {
                accepts as f64 / answered as f64
            },
            sweep_disconnects: m.sweep_disconnects_total.get() as u64,
        },
    })
}

/// GET /api/v1/sessions
async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<SessionsResponse> {
    Json(state.registry.all().await.into())
}

/// GET /api/v1/tenants/:tenant/sessions
async fn list_tenant_sessions(
    State(state): State<Arc<ApiState>>,
    Path(tenant): Path<Uuid>,
) -> Json<SessionsResponse> {
    Json(state.registry.by_tenant(tenant).await.into())
}

/// GET /api/v1/tenants/:tenant/vouchers/:code/sessions
async fn list_voucher_sessions(
    State(state): State<Arc<ApiState>>,
    Path((tenant, code)): Path<(Uuid, String)>,
) -> Json<SessionsResponse> {
    Json(state.registry.by_tenant_and_username(tenant, &code).await.into())
}

/// DELETE /api/v1/sessions/:id
async fn disconnect_session(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
) -> Response {
    info!(session = %session_id, "API request to disconnect session");
    match state.control.disconnect(&session_id, CAUSE_ADMIN_DISCONNECT).await {
        Some(session) => Json(DisconnectResponse {
            success: true,
            message: format!("session {session_id} disconnected"),
            session: Some(session),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("session {session_id} is not active"),
                code: "session_not_found".to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /api/v1/sweep
async fn run_sweep(State(state): State<Arc<ApiState>>) -> Json<SweepResponse> {
    info!("API request to run expiry sweep");
    let report = state.sweep.run_once().await;
    Json(SweepResponse { success: true, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceBroadcaster;
    use crate::sessions::ActiveSession;
    use crate::store::MemoryStore;
    use axum::{body::Body, http::Request};
    use chrono::Utc;
    use tower::ServiceExt;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        app: Router,
        tenant: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceBroadcaster::default());
        let control = Arc::new(SessionControl::new(store.clone(), registry.clone(), presence));
        let sweep = Arc::new(ExpirySweep::new(store, registry.clone(), control.clone()));

        let mut rbac = RbacConfig::default();
        rbac.users.insert("CN=admin".into(), "admin".into());
        rbac.users.insert("CN=helpdesk".into(), "support".into());
        let app = build_api_router(rbac, ApiState::new(registry.clone(), control, sweep));
        Fixture {
            registry,
            app,
            tenant: Uuid::new_v4(),
        }
    }

    async fn seed(fx: &Fixture, id: &str, username: &str, tenant: Option<Uuid>) {
        let now = Utc::now();
        fx.registry
            .start(ActiveSession {
                session_id: id.into(),
                username: username.into(),
                nas_ip: "10.0.0.5".parse().unwrap(),
                framed_ip: None,
                calling_station_id: None,
                started_at: now,
                input_octets: 0,
                output_octets: 0,
                session_time: 0,
                tenant_id: tenant,
                customer_id: None,
                last_update: now,
            })
            .await;
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(super::super::rbac::USER_HEADER, user);
        }
        let response = app.clone().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn anonymous_is_forbidden() {
        let fx = fixture();
        let (status, _) = call(&fx.app, "GET", "/api/v1/sessions", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn listing_by_tenant_and_voucher() {
        let fx = fixture();
        seed(&fx, "a", "ABC123", Some(fx.tenant)).await;
        seed(&fx, "b", "ABC123", Some(fx.tenant)).await;
        seed(&fx, "c", "alice", Some(Uuid::new_v4())).await;

        let (status, body) = call(&fx.app, "GET", "/api/v1/sessions", Some("CN=helpdesk")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);

        let uri = format!("/api/v1/tenants/{}/sessions", fx.tenant);
        let (_, body) = call(&fx.app, "GET", &uri, Some("CN=helpdesk")).await;
        assert_eq!(body["total"], 2);

        let uri = format!("/api/v1/tenants/{}/vouchers/ABC123/sessions", fx.tenant);
        let (_, body) = call(&fx.app, "GET", &uri, Some("CN=helpdesk")).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["sessions"][0]["username"], "ABC123");
    }

    #[tokio::test]
    async fn bad_tenant_id_is_client_error() {
        let fx = fixture();
        let uri = "/api/v1/tenants/not-a-uuid/sessions";
        let (status, _) = call(&fx.app, "GET", uri, Some("CN=admin")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disconnect_requires_write_permission() {
        let fx = fixture();
        seed(&fx, "a", "alice", None).await;

        let (status, _) = call(&fx.app, "DELETE", "/api/v1/sessions/a", Some("CN=helpdesk")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(fx.registry.len().await, 1);

        let (status, body) = call(&fx.app, "DELETE", "/api/v1/sessions/a", Some("CN=admin")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["session_id"], "a");
        assert!(fx.registry.is_empty().await);

        let (status, body) = call(&fx.app, "DELETE", "/api/v1/sessions/a", Some("CN=admin")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "session_not_found");
    }

    #[tokio::test]
    async fn sweep_and_status() {
        let fx = fixture();
        let (status, body) = call(&fx.app, "POST", "/api/v1/sweep", Some("CN=admin")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["examined"], 0);

        let (status, body) = call(&fx.app, "GET", "/api/v1/status", Some("CN=helpdesk")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["stats"]["active_sessions"], 0);
    }
}
