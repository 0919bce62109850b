// SPDX-License-Identifier: AGPL-3.0-only
//! Customer online/offline notifications for the rest of the platform.

use serde::Serialize;
use std::net::Ipv4Addr;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PresenceEvent {
    Online {
        tenant_id: Uuid,
        customer_id: Uuid,
        username: String,
        ip: Option<Ipv4Addr>,
    },
    Offline {
        tenant_id: Uuid,
        customer_id: Uuid,
        username: String,
    },
}

/// Fan-out of presence events. Sending with no subscribers is not an error.
pub struct PresenceBroadcaster {
    sender: broadcast::Sender<PresenceEvent>,
}

impl PresenceBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.sender.subscribe()
    }

    pub fn broadcast_online(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
        username: &str,
        ip: Option<Ipv4Addr>,
    ) {
        self.send(PresenceEvent::Online {
            tenant_id,
            customer_id,
            username: username.to_string(),
            ip,
        });
    }

    pub fn broadcast_offline(&self, tenant_id: Uuid, customer_id: Uuid, username: &str) {
        self.send(PresenceEvent::Offline {
            tenant_id,
            customer_id,
            username: username.to_string(),
        });
    }

    fn send(&self, event: PresenceEvent) {
        if self.sender.send(event).is_err() {
            debug!("presence event dropped; no subscribers");
        }
    }
}

impl Default for PresenceBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
