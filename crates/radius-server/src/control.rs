// SPDX-License-Identifier: AGPL-3.0-only
//! Server-initiated session termination.
//!
//! Disconnect is bookkeeping on this side only: the accounting record is
//! closed and the session leaves the registry. The NAS keeps forwarding
//! traffic until the subscriber drops or re-authenticates.

use crate::presence::PresenceBroadcaster;
use crate::sessions::{ActiveSession, SessionRegistry};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SessionControl {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceBroadcaster>,
}

impl SessionControl {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            store,
            registry,
            presence,
        }
    }

    /// Terminate a live session with `cause` as the recorded terminate cause.
    /// Returns the removed session, or `None` when it had already ended.
    pub async fn disconnect(&self, session_id: &str, cause: &str) -> Option<ActiveSession> {
        self.disconnect_at(session_id, cause, Utc::now()).await
    }

    pub async fn disconnect_at(
        &self,
        session_id: &str,
        cause: &str,
        now: DateTime<Utc>,
    ) -> Option<ActiveSession> {
        let session = self.registry.force_remove(session_id).await?;

        match self
            .store
            .close_accounting(session_id, now, Some(session.counters()), cause)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(session = %session_id, "no open accounting record to close"),
            Err(err) => {
                error!(error = %err, session = %session_id, "failed to close accounting record")
            }
        }

        if let (Some(tenant), Some(customer)) = (session.tenant_id, session.customer_id) {
            if let Err(err) = self.store.set_customer_offline(customer).await {
                warn!(error = %err, customer = %customer, "failed to mark customer offline");
            }
            self.presence.broadcast_offline(tenant, customer, &session.username);
        }

        // TODO: send a CoA Disconnect-Request (RFC 5176) to session.nas_ip on
        // DEFAULT_COA_PORT so the NAS actually tears the session down.
        info!(
            session = %session_id,
            user = %session.username,
            nas = %session.nas_ip,
            cause = %cause,
            "session disconnected"
        );
        Some(session)
    }
}
