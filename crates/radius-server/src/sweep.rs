// SPDX-License-Identifier: AGPL-3.0-only
//! Periodic disconnect of sessions whose voucher has run out.

use crate::control::SessionControl;
use crate::metrics::metrics;
use crate::sessions::SessionRegistry;
use crate::store::Store;
use crate::voucher;
use chrono::{DateTime, Utc};
use isp_radius_proto::CAUSE_ADMIN_DISCONNECT;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub disconnected: Vec<String>,
}

pub struct ExpirySweep {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    control: Arc<SessionControl>,
}

impl ExpirySweep {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        control: Arc<SessionControl>,
    ) -> Self {
        Self {
            store,
            registry,
            control,
        }
    }

    pub async fn run_once(&self) -> SweepReport {
        self.run_once_at(Utc::now()).await
    }

    /// Snapshot the registry, then disconnect voucher sessions one by one. A
    /// session that stopped in the meantime is skipped.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> SweepReport {
        let sessions = self.registry.all().await;
        let mut report = SweepReport {
            examined: sessions.len(),
            ..SweepReport::default()
        };

        for session in sessions {
            if session.customer_id.is_some() {
                continue;
            }
            let found = match self.store.find_voucher(session.tenant_id, &session.username).await {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        error = %err,
                        session = %session.session_id,
                        "voucher lookup failed during sweep"
                    );
                    continue;
                }
            };
            let package = match self.store.get_package(found.package_id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        error = %err,
                        voucher = %found.code,
                        "package lookup failed during sweep"
                    );
                    continue;
                }
            };
            if !voucher::is_expired(&found, &package, now) {
                continue;
            }
            let expired = voucher::expire_if_due(self.store.as_ref(), &found, &package, now).await;
            if let Err(err) = expired {
                warn!(error = %err, voucher = %found.code, "failed to expire voucher during sweep");
            }
            match self
                .control
                .disconnect_at(&session.session_id, CAUSE_ADMIN_DISCONNECT, now)
                .await
            {
                Some(_) => {
                    metrics().sweep_disconnects_total.inc();
                    report.disconnected.push(session.session_id);
                }
                None => {
                    debug!(session = %session.session_id, "session ended before sweep disconnect")
                }
            }
        }

        if !report.disconnected.is_empty() {
            info!(
                examined = report.examined,
                disconnected = report.disconnected.len(),
                "expiry sweep disconnected sessions"
            );
        }
        metrics().sessions_active.set(self.registry.len().await as f64);
        report
    }

    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}
