// SPDX-License-Identifier: AGPL-3.0-only
//! Response bodies for the management API.

use crate::sessions::ActiveSession;
use crate::sweep::SweepReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub stats: ServerStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerStats {
    pub active_sessions: usize,
    pub auth_accepts: u64,
    pub auth_rejects: u64,
    pub auth_success_rate: f64,
    pub sweep_disconnects: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<ActiveSession>,
    pub total: usize,
}

impl From<Vec<ActiveSession>> for SessionsResponse {
    fn from(sessions: Vec<ActiveSession>) -> Self {
        let total = sessions.len();
        Self { sessions, total }
    }
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<ActiveSession>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: SweepReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
