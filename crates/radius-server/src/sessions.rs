// SPDX-License-Identifier: AGPL-3.0-only
//! In-memory table of live sessions, keyed by Acct-Session-Id.
//!
//! Built from accounting traffic only; a restart starts empty and the table
//! converges again as NASes send Start/Stop. Voucher device and session limits
//! are counted from here, never from a persisted counter.

use crate::store::Counters;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub session_id: String,
    pub username: String,
    pub nas_ip: IpAddr,
    pub framed_ip: Option<Ipv4Addr>,
    pub calling_station_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub input_octets: u64,
    pub output_octets: u64,
    pub session_time: u32,
    pub tenant_id: Option<Uuid>,
    /// Set for subscriber sessions; voucher sessions have no customer.
    pub customer_id: Option<Uuid>,
    pub last_update: DateTime<Utc>,
}

impl ActiveSession {
    pub fn counters(&self) -> Counters {
        Counters {
            input_octets: self.input_octets,
            output_octets: self.output_octets,
            session_time: self.session_time,
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A repeated Start for the same id returns the
    /// replaced entry.
    pub async fn start(&self, session: ActiveSession) -> Option<ActiveSession> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session)
    }

    /// Apply an Interim-Update. Identity and start time are kept. Returns
    /// `false` when the session is unknown (e.g. started before a restart).
    pub async fn interim(&self, session_id: &str, counters: Counters, at: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.input_octets = counters.input_octets;
                session.output_octets = counters.output_octets;
                session.session_time = counters.session_time;
                session.last_update = at;
                true
            }
            None => false,
        }
    }

    pub async fn stop(&self, session_id: &str) -> Option<ActiveSession> {
        self.sessions.write().await.remove(session_id)
    }

    /// Administrative removal. A session already gone is a no-op (`None`).
    pub async fn force_remove(&self, session_id: &str) -> Option<ActiveSession> {
        self.stop(session_id).await
    }

    pub async fn get(&self, session_id: &str) -> Option<ActiveSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn all(&self) -> Vec<ActiveSession> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<ActiveSession> = sessions.values().cloned().collect();
        out.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        out
    }

    pub async fn by_tenant(&self, tenant_id: Uuid) -> Vec<ActiveSession> {
        let mut out: Vec<ActiveSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.tenant_id == Some(tenant_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        out
    }

    /// Sessions of one tenant under one username (a voucher code for hotspot
    /// sessions).
    pub async fn by_tenant_and_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Vec<ActiveSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.tenant_id == Some(tenant_id) && s.username == username)
            .cloned()
            .collect()
    }

    /// Live session count for a username. `tenant` narrows the count when
    /// known, so equal codes in different tenants do not share limits.
    pub async fn count_by_username(&self, tenant: Option<Uuid>, username: &str) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.username == username && tenant.map_or(true, |t| s.tenant_id == Some(t)))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session(id: &str, username: &str, tenant: Option<Uuid>) -> ActiveSession {
        let now = Utc::now();
        ActiveSession {
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
        }
    }

    #[tokio::test]
    async fn start_interim_stop() {
        let registry = SessionRegistry::new();
        assert!(registry.start(session("s1", "alice", None)).await.is_none());

        let counters = Counters {
            input_octets: 1_000,
            output_octets: 2_000,
            session_time: 60,
        };
        assert!(registry.interim("s1", counters, Utc::now()).await);
        let live = registry.get("s1").await.unwrap();
        assert_eq!(live.counters(), counters);
        assert_eq!(registry.len().await, 1);

        assert!(registry.stop("s1").await.is_some());
        assert!(registry.is_empty().await);
        assert!(!registry.interim("s1", counters, Utc::now()).await);
    }

    #[tokio::test]
    async fn repeated_start_keeps_single_entry() {
        let registry = SessionRegistry::new();
        registry.start(session("s1", "alice", None)).await;
        assert!(registry.start(session("s1", "alice", None)).await.is_some());
        assert_eq!(registry.count_by_username(None, "alice").await, 1);
    }

    #[tokio::test]
    async fn tenant_filters() {
        let registry = SessionRegistry::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        registry.start(session("a", "ABC123", Some(t1))).await;
        registry.start(session("b", "ABC123", Some(t2))).await;
        registry.start(session("c", "bob", Some(t1))).await;

        assert_eq!(registry.by_tenant(t1).await.len(), 2);
        assert_eq!(registry.by_tenant_and_username(t1, "ABC123").await.len(), 1);
        assert_eq!(registry.count_by_username(Some(t2), "ABC123").await, 1);
        assert_eq!(registry.count_by_username(None, "ABC123").await, 2);
        assert_eq!(registry.all().await.len(), 3);
    }

    #[tokio::test]
    async fn force_remove_missing_is_noop() {
        let registry = SessionRegistry::new();
        registry.start(session("a", "alice", None)).await;
        assert!(registry.force_remove("zzz").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_disjoint_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("s{i}");
                registry.start(session(&id, "shared", None)).await;
                let count = registry.count_by_username(None, "shared").await;
                assert!(count >= 1);
                if i % 2 == 0 {
                    assert!(registry.stop(&id).await.is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.count_by_username(None, "shared").await, 32);
        for i in (1..64).step_by(2) {
            assert!(registry.get(&format!("s{i}")).await.is_some());
        }
    }
}
