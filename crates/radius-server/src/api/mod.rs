// SPDX-License-Identifier: AGPL-3.0-only
//! Management API with RBAC: live session listing, administrative
//! disconnect and on-demand expiry sweeps.

mod handlers;
mod models;
mod rbac;

pub use handlers::{build_api_router, ApiState};
pub use models::*;
pub use rbac::{RbacConfig, RbacMiddleware, USER_HEADER};

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub async fn serve_api(addr: SocketAddr, rbac: RbacConfig, state: ApiState) -> anyhow::Result<()> {
    let app = build_api_router(rbac, state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Management API server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server error");
        return Err(e.into());
    }
    Ok(())
}
