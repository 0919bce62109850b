// SPDX-License-Identifier: AGPL-3.0-only
//! Access-Request handling for PPPoE subscribers and hotspot vouchers.
//!
//! A username that matches a voucher code in the resolved tenant is treated as
//! a voucher; anything else goes through the subscriber path. Every request
//! ends in exactly one [`AuthOutcome`]. Reject reasons are logged and counted
//! but never put on the wire.

use crate::model::{Package, ServicePlan, Subscriber, Voucher, VoucherStatus};
use crate::sessions::SessionRegistry;
use crate::store::Store;
use crate::voucher;
use chrono::{DateTime, Utc};
use isp_radius_proto::attributes::{
    CALLING_STATION_ID, FRAMED_IP_ADDRESS, NAS_IP_ADDRESS, USER_NAME, USER_PASSWORD,
};
use isp_radius_proto::crypto::constant_time_eq;
use isp_radius_proto::{
    decrypt_user_password, mikrotik_group, mikrotik_rate_limit, Attribute, Packet,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Subscriber,
    Voucher,
    Unknown,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::Subscriber => "subscriber",
            CredentialKind::Voucher => "voucher",
            CredentialKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("missing User-Name")]
    MissingUserName,
    #[error("missing User-Password")]
    MissingPassword,
    #[error("undecodable User-Password")]
    MalformedPassword,
    #[error("unknown user")]
    UnknownUser,
    #[error("password mismatch")]
    BadPassword,
    #[error("subscriber expired at {0}")]
    SubscriberExpired(DateTime<Utc>),
    #[error("voucher expired")]
    VoucherExpired,
    #[error("voucher package {0} not found")]
    PackageMissing(Uuid),
    #[error("voucher bound to {bound}, request from {presented}")]
    MacMismatch { bound: String, presented: String },
    #[error("device binding requires Calling-Station-Id")]
    MacRequired,
    #[error("device limit reached ({active}/{limit})")]
    DeviceLimit { active: usize, limit: u32 },
    #[error("session limit reached ({active}/{limit})")]
    SessionLimit { active: usize, limit: u32 },
    #[error("store unavailable: {0}")]
    Store(String),
}

impl RejectReason {
    /// Stable metric label.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingUserName
            | RejectReason::MissingPassword
            | RejectReason::MalformedPassword => "malformed",
            RejectReason::UnknownUser => "unknown_user",
            RejectReason::BadPassword => "bad_password",
            RejectReason::SubscriberExpired(_) | RejectReason::VoucherExpired => "expired",
            RejectReason::PackageMissing(_) => "package_missing",
            RejectReason::MacMismatch { .. } => "mac_mismatch",
            RejectReason::MacRequired => "mac_required",
            RejectReason::DeviceLimit { .. } => "device_limit",
            RejectReason::SessionLimit { .. } => "session_limit",
            RejectReason::Store(_) => "store",
        }
    }
}

impl From<anyhow::Error> for RejectReason {
    fn from(err: anyhow::Error) -> Self {
        RejectReason::Store(format!("{err:#}"))
    }
}

/// Decoded Access-Request fields the handler works from.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub username: String,
    pub password: Vec<u8>,
    pub calling_station_id: Option<String>,
    pub nas_ip: Option<Ipv4Addr>,
}

impl AuthRequest {
    /// Extract PAP credentials. `secret` must be the one the reply is signed with.
    pub fn from_packet(packet: &Packet, secret: &[u8]) -> Result<Self, RejectReason> {
        let username = packet
            .string_attribute(USER_NAME)
            .filter(|u| !u.is_empty())
            .ok_or(RejectReason::MissingUserName)?;
        let hidden = packet.attribute(USER_PASSWORD).ok_or(RejectReason::MissingPassword)?;
        let password = decrypt_user_password(&hidden.value, secret, &packet.authenticator)
            .map_err(|_| RejectReason::MalformedPassword)?;
        Ok(Self {
            username,
            password,
            calling_station_id: packet
                .string_attribute(CALLING_STATION_ID)
                .filter(|s| !s.is_empty()),
            nas_ip: packet.attribute(NAS_IP_ADDRESS).and_then(|a| a.as_ipv4().ok()),
        })
    }
}

#[derive(Debug)]
pub enum AuthOutcome {
    Accept {
        kind: CredentialKind,
        attributes: Vec<Attribute>,
    },
    Reject {
        kind: CredentialKind,
        reason: RejectReason,
    },
}

impl AuthOutcome {
    pub fn kind(&self) -> CredentialKind {
        match self {
            AuthOutcome::Accept { kind, .. } | AuthOutcome::Reject { kind, .. } => *kind,
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, AuthOutcome::Accept { .. })
    }
}

/// Mikrotik rate-limit for a subscriber plan. Plan speeds are Mbps.
pub fn plan_rate_limit(plan: &ServicePlan) -> String {
    let up = plan.upload_mbps.saturating_mul(1000);
    let down = plan.download_mbps.saturating_mul(1000);
    match &plan.burst {
        Some(b) => format!(
            "{up}k/{down}k {}k/{}k {}k/{}k {}/{}",
            b.burst_upload_kbps,
            b.burst_download_kbps,
            b.threshold_upload_kbps,
            b.threshold_download_kbps,
            b.burst_time_secs,
            b.burst_time_secs
        ),
        None => format!("{up}k/{down}k"),
    }
}

/// Mikrotik rate-limit for a voucher package. Package speeds are already kbps.
pub fn package_rate_limit(package: &Package) -> String {
    format!("{}k/{}k", package.upload_kbps, package.download_kbps)
}

/// Canonical MAC text for comparisons: upper-case, colon separated.
pub fn normalize_mac(raw: &str) -> String {
    raw.trim().to_ascii_uppercase().replace('-', ":")
}

pub struct AuthHandler {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
}

impl AuthHandler {
    pub fn new(store: Arc<dyn Store>, registry: Arc<SessionRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn handle(&self, request: &AuthRequest, tenant: Option<Uuid>) -> AuthOutcome {
        self.handle_at(request, tenant, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        request: &AuthRequest,
        tenant: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AuthOutcome {
        let voucher = match self.store.find_voucher(tenant, &request.username).await {
            Ok(found) => found,
            Err(err) => {
                return AuthOutcome::Reject {
                    kind: CredentialKind::Unknown,
                    reason: err.into(),
                }
            }
        };

        let outcome = match voucher {
            Some(voucher) => match self.authenticate_voucher(request, voucher, now).await {
                Ok(attributes) => AuthOutcome::Accept {
                    kind: CredentialKind::Voucher,
                    attributes,
                },
                Err(reason) => AuthOutcome::Reject {
                    kind: CredentialKind::Voucher,
                    reason,
                },
            },
            None => match self.authenticate_subscriber(request, tenant, now).await {
                Ok(attributes) => AuthOutcome::Accept {
                    kind: CredentialKind::Subscriber,
                    attributes,
                },
                Err(RejectReason::UnknownUser) => AuthOutcome::Reject {
                    kind: CredentialKind::Unknown,
                    reason: RejectReason::UnknownUser,
                },
                Err(reason) => AuthOutcome::Reject {
                    kind: CredentialKind::Subscriber,
                    reason,
                },
            },
        };

        match &outcome {
            AuthOutcome::Accept { kind, .. } => {
                info!(user = %request.username, kind = kind.as_str(), "access accepted")
            }
            AuthOutcome::Reject { kind, reason } => {
                warn!(
                    user = %request.username,
                    kind = kind.as_str(),
                    reason = %reason,
                    "access rejected"
                )
            }
        }
        outcome
    }

    async fn authenticate_subscriber(
        &self,
        request: &AuthRequest,
        tenant: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Attribute>, RejectReason> {
        let subscriber = self
            .store
            .find_active_subscriber(tenant, &request.username)
            .await?
            .ok_or(RejectReason::UnknownUser)?;

        // Plaintext comparison; NAS-side PAP deployments depend on it.
        if !constant_time_eq(subscriber.password.as_bytes(), &request.password) {
            return Err(RejectReason::BadPassword);
        }
        if let Some(expires_at) = subscriber.expires_at {
            if expires_at <= now {
                return Err(RejectReason::SubscriberExpired(expires_at));
            }
        }

        let attributes = self.subscriber_attributes(&subscriber).await?;

        if let Err(err) = self.store.set_customer_online(subscriber.customer_id, None, now).await {
            warn!(
                error = %err,
                customer = %subscriber.customer_id,
                "failed to mark customer online"
            );
        }
        Ok(attributes)
    }

    async fn subscriber_attributes(
        &self,
        subscriber: &Subscriber,
    ) -> Result<Vec<Attribute>, RejectReason> {
        let mut attributes = Vec::new();
        let plan = match self.store.get_customer(subscriber.customer_id).await? {
            Some(customer) => match customer.service_plan_id {
                Some(plan_id) => self.store.get_service_plan(plan_id).await?,
                None => None,
            },
            None => {
                warn!(
                    customer = %subscriber.customer_id,
                    user = %subscriber.username,
                    "subscriber has no customer record"
                );
                None
            }
        };

        if let Some(plan) = plan {
            match mikrotik_rate_limit(&plan_rate_limit(&plan)) {
                Ok(attr) => attributes.push(attr),
                Err(err) => {
                    warn!(error = %err, plan = %plan.name, "rate limit does not fit in a VSA")
                }
            }
            match mikrotik_group(&plan.name) {
                Ok(attr) => attributes.push(attr),
                Err(err) => {
                    warn!(error = %err, plan = %plan.name, "plan name does not fit in a VSA")
                }
            }
        }
        if let Some(ip) = subscriber.static_ip {
            attributes.push(Attribute::ipv4(FRAMED_IP_ADDRESS, ip));
        }
        Ok(attributes)
    }

    async fn authenticate_voucher(
        &self,
        request: &AuthRequest,
        mut voucher: Voucher,
        now: DateTime<Utc>,
    ) -> Result<Vec<Attribute>, RejectReason> {
        if !verify_voucher_password(&voucher, &request.password).await {
            return Err(RejectReason::BadPassword);
        }

        let package = self
            .store
            .get_package(voucher.package_id)
            .await?
            .ok_or(RejectReason::PackageMissing(voucher.package_id))?;

        if voucher::is_expired(&voucher, &package, now) {
            voucher::expire_if_due(self.store.as_ref(), &voucher, &package, now).await?;
            return Err(RejectReason::VoucherExpired);
        }

        let presented_mac = request.calling_station_id.as_deref().map(normalize_mac);
        if package.mac_binding && presented_mac.is_none() {
            return Err(RejectReason::MacRequired);
        }

        if voucher.status == VoucherStatus::Unused {
            let expires_at = package.expiry_from(now);
            let activated = self
                .store
                .activate_voucher(voucher.id, now, expires_at, presented_mac.as_deref())
                .await?;
            if activated {
                info!(
                    voucher = %voucher.code,
                    tenant = %voucher.tenant_id,
                    mac = presented_mac.as_deref().unwrap_or("-"),
                    "voucher activated"
                );
                voucher.status = VoucherStatus::Active;
                voucher.activated_at = Some(now);
                voucher.expires_at = expires_at;
                voucher.mac_address = presented_mac.clone();
            } else {
                // A concurrent request activated it first; continue with the stored binding.
                voucher = self
                    .store
                    .find_voucher(Some(voucher.tenant_id), &voucher.code)
                    .await?
                    .ok_or(RejectReason::UnknownUser)?;
                if voucher::is_expired(&voucher, &package, now) {
                    return Err(RejectReason::VoucherExpired);
                }
            }
        }

        if package.mac_binding {
            let presented = presented_mac.ok_or(RejectReason::MacRequired)?;
            let bound = match voucher.mac_address.as_deref() {
                Some(bound) => normalize_mac(bound),
                None => self.bind_first_device(&voucher, &presented).await?,
            };
            if presented != bound {
                return Err(RejectReason::MacMismatch { bound, presented });
            }
        }

        let active = self
            .registry
            .count_by_username(Some(voucher.tenant_id), &voucher.code)
            .await;
        if package.device_limit > 0 && active >= package.device_limit as usize {
            return Err(RejectReason::DeviceLimit {
                active,
                limit: package.device_limit,
            });
        }
        if package.session_limit > 0 && active >= package.session_limit as usize {
            return Err(RejectReason::SessionLimit {
                active,
                limit: package.session_limit,
            });
        }

        let attr = mikrotik_rate_limit(&package_rate_limit(&package))
            .map_err(|e| RejectReason::Store(format!("package rate limit: {e}")))?;
        Ok(vec![attr])
    }

    /// Bind `presented` to a voucher that has no device yet and return the
    /// device that ended up bound.
    async fn bind_first_device(
        &self,
        voucher: &Voucher,
        presented: &str,
    ) -> Result<String, RejectReason> {
        if self.store.bind_voucher_mac(voucher.id, presented).await? {
            info!(voucher = %voucher.code, mac = %presented, "voucher bound to device");
            return Ok(presented.to_string());
        }
        // Another request bound a device first.
        Ok(self
            .store
            .find_voucher(Some(voucher.tenant_id), &voucher.code)
            .await?
            .and_then(|v| v.mac_address)
            .map(|mac| normalize_mac(&mac))
            .unwrap_or_default())
    }
}

/// argon2 verification is CPU bound; keep it off the reactor threads.
async fn verify_voucher_password(voucher: &Voucher, password: &[u8]) -> bool {
    let phc = voucher.password_hash.clone();
    let password = password.to_vec();
    tokio::task::spawn_blocking(move || voucher::verify_password(&phc, &password))
        .await
        .unwrap_or(false)
}
