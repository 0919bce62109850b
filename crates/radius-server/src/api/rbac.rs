// SPDX-License-Identifier: AGPL-3.0-only
//! Role-based access control for the management API.
//!
//! The caller identity comes from the `X-User-CN` header set by the fronting
//! proxy after client-certificate authentication.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::warn;

pub const USER_HEADER: &str = "X-User-CN";

pub const READ_SESSIONS: &str = "read:sessions";
pub const WRITE_SESSIONS: &str = "write:sessions";
pub const READ_STATUS: &str = "read:status";

type PermissionCheck = Pin<Box<dyn Future<Output = Result<Response, StatusCode>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacConfig {
    /// role -> permissions, `verb:*` allowed as a wildcard
    pub roles: HashMap<String, Vec<String>>,
    /// caller CN -> role
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl Default for RbacConfig {
    fn default() -> Self {
        let mut roles = HashMap::new();
        roles.insert("admin".to_string(), vec!["read:*".to_string(), "write:*".to_string()]);
        roles.insert(
            "noc".to_string(),
            vec!["read:*".to_string(), WRITE_SESSIONS.to_string()],
        );
        roles.insert(
            "support".to_string(),
            vec![READ_STATUS.to_string(), READ_SESSIONS.to_string()],
        );
        Self {
            roles,
            users: HashMap::new(),
        }
    }
}

impl RbacConfig {
    /// Load a JSON document shaped like `{"roles": {...}, "users": {...}}`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading RBAC config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing RBAC config {}", path.display()))
    }

    pub fn has_permission(&self, user: &str, permission: &str) -> bool {
        let Some(role) = self.users.get(user) else {
            warn!(user = %user, "user not found in RBAC config");
            return false;
        };
        let Some(permissions) = self.roles.get(role) else {
            warn!(role = %role, "role not found in RBAC config");
            return false;
        };
        permissions.iter().any(|granted| {
            granted == permission
                || granted
                    .strip_suffix('*')
                    .filter(|prefix| prefix.ends_with(':'))
                    .is_some_and(|prefix| permission.starts_with(prefix))
        })
    }
}

#[derive(Clone)]
pub struct RbacMiddleware {
    config: RbacConfig,
    required_permission: String,
}

impl RbacMiddleware {
    pub fn new(config: RbacConfig, required_permission: impl Into<String>) -> Self {
        Self {
            config,
            required_permission: required_permission.into(),
        }
    }

    pub async fn check_permission(
        &self,
        req: Request<Body>,
        next: Next,
    ) -> Result<Response, StatusCode> {
        let user = req
            .headers()
            .get(USER_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("anonymous");

        if !self.config.has_permission(user, &self.required_permission) {
            warn!(
                user = %user,
                permission = %self.required_permission,
                "access denied: insufficient permissions"
            );
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(next.run(req).await)
    }
}

/// Middleware function for `axum::middleware::from_fn`.
pub fn require_permission(
    config: &RbacConfig,
    permission: impl Into<String>,
) -> impl Fn(Request<Body>, Next) -> PermissionCheck + Clone {
    let middleware = RbacMiddleware::new(config.clone(), permission);
    move |req: Request<Body>, next: Next| {
        let middleware = middleware.clone();
        Box::pin(async move { middleware.check_permission(req, next).await })
    }
}
