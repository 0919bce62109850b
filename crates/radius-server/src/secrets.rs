// SPDX-License-Identifier: AGPL-3.0-only
//! Shared-secret resolution by NAS source address.
//!
//! Lookup order:
//! 1. the active NAS registered with the source IP
//! 2. any active NAS (only when the fallback is enabled)
//! 3. the configured default secret
//!
//! The fallback tier weakens tenant isolation: a device that is not registered
//! can still talk to the server using some other tenant's secret. It stays
//! enabled by default because existing deployments rely on it.

use crate::store::Store;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_SHARED_SECRET: &str = "testing123";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Nas,
    Fallback,
    Default,
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecretSource::Nas => "nas",
            SecretSource::Fallback => "fallback",
            SecretSource::Default => "default",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub secret: Vec<u8>,
    /// Tenant of the NAS the secret came from; `None` for the default tier.
    pub tenant_id: Option<Uuid>,
    pub source: SecretSource,
}

pub struct SecretResolver {
    store: Arc<dyn Store>,
    default_secret: Vec<u8>,
    allow_fallback: bool,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            default_secret: DEFAULT_SHARED_SECRET.as_bytes().to_vec(),
            allow_fallback: true,
        }
    }

    pub fn with_default_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.default_secret = secret.into();
        self
    }

    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }

    /// Never fails; store errors drop through to the next tier.
    pub async fn resolve(&self, source_ip: IpAddr) -> ResolvedSecret {
        match self.store.find_nas_by_ip(source_ip).await {
            Ok(Some(nas)) => {
                debug!(peer = %source_ip, nas = %nas.name, "resolved secret from registered NAS");
                return ResolvedSecret {
                    secret: nas.secret.into_bytes(),
                    tenant_id: Some(nas.tenant_id),
                    source: SecretSource::Nas,
                };
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, peer = %source_ip, "NAS lookup failed"),
        }

        if self.allow_fallback {
            match self.store.any_active_nas().await {
                Ok(Some(nas)) => {
                    warn!(
                        peer = %source_ip,
                        nas = %nas.name,
                        tenant = %nas.tenant_id,
                        "unregistered NAS; using secret of another active NAS"
                    );
                    return ResolvedSecret {
                        secret: nas.secret.into_bytes(),
                        tenant_id: Some(nas.tenant_id),
                        source: SecretSource::Fallback,
                    };
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, peer = %source_ip, "fallback NAS lookup failed"),
            }
        }

        debug!(peer = %source_ip, "using default shared secret");
        ResolvedSecret {
            secret: self.default_secret.clone(),
            tenant_id: None,
            source: SecretSource::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Nas;
    use crate::store::MemoryStore;

    fn nas(ip: &str, secret: &str, active: bool) -> Nas {
        Nas {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: format!("nas-{ip}"),
            ip: ip.parse().unwrap(),
            secret: secret.into(),
            active,
        }
    }

    #[tokio::test]
    async fn registered_nas_wins() {
        let store = Arc::new(MemoryStore::new());
        let registered = nas("10.0.0.5", "shared1", true);
        let tenant = registered.tenant_id;
        store.insert_nas(nas("10.0.0.9", "other", true)).await;
        store.insert_nas(registered).await;

        let resolved = SecretResolver::new(store).resolve("10.0.0.5".parse().unwrap()).await;
        assert_eq!(resolved.source, SecretSource::Nas);
        assert_eq!(resolved.secret, b"shared1");
        assert_eq!(resolved.tenant_id, Some(tenant));
    }

    #[tokio::test]
    async fn unknown_ip_uses_any_active_nas() {
        let store = Arc::new(MemoryStore::new());
        store.insert_nas(nas("10.0.0.7", "retired", false)).await;
        store.insert_nas(nas("10.0.0.9", "other", true)).await;

        let resolved = SecretResolver::new(store).resolve("192.0.2.1".parse().unwrap()).await;
        assert_eq!(resolved.source, SecretSource::Fallback);
        assert_eq!(resolved.secret, b"other");
    }

    #[tokio::test]
    async fn inactive_nas_is_not_matched() {
        let store = Arc::new(MemoryStore::new());
        store.insert_nas(nas("10.0.0.7", "retired", false)).await;

        let resolved = SecretResolver::new(store).resolve("10.0.0.7".parse().unwrap()).await;
        assert_eq!(resolved.source, SecretSource::Default);
        assert_eq!(resolved.secret, DEFAULT_SHARED_SECRET.as_bytes());
        assert!(resolved.tenant_id.is_none());
    }

    #[tokio::test]
    async fn fallback_can_be_disabled() {
        let store = Arc::new(MemoryStore::new());
        store.insert_nas(nas("10.0.0.9", "other", true)).await;

        let resolved = SecretResolver::new(store)
            .with_fallback(false)
            .with_default_secret("configured")
            .resolve("192.0.2.1".parse().unwrap())
            .await;
        assert_eq!(resolved.source, SecretSource::Default);
        assert_eq!(resolved.secret, b"configured");
    }
}
