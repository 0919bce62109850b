// SPDX-License-Identifier: AGPL-3.0-only
//! Accounting-Request handling: audit records, the live session table and
//! customer presence.
//!
//! Persistence failures are logged and counted; the caller acknowledges the
//! request regardless so the NAS does not retransmit.

use crate::metrics::metrics;
use crate::model::{AccountingRecord, Subscriber, Voucher};
use crate::presence::PresenceBroadcaster;
use crate::sessions::{ActiveSession, SessionRegistry};
use crate::store::{Counters, Store};
use crate::voucher;
use chrono::{DateTime, Utc};
use isp_radius_proto::attributes::{
    ACCT_INPUT_GIGAWORDS, ACCT_INPUT_OCTETS, ACCT_OUTPUT_GIGAWORDS, ACCT_OUTPUT_OCTETS,
    ACCT_SESSION_ID, ACCT_SESSION_TIME, ACCT_STATUS_TYPE, ACCT_TERMINATE_CAUSE, CALLING_STATION_ID,
    FRAMED_IP_ADDRESS, NAS_IP_ADDRESS, USER_NAME,
};
use isp_radius_proto::{octets_with_gigawords, terminate_cause_name, AcctStatusType, Packet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcctDecodeError {
    #[error("missing Acct-Status-Type")]
    MissingStatusType,
    #[error("unsupported Acct-Status-Type {0}")]
    UnknownStatusType(u32),
    #[error("missing Acct-Session-Id")]
    MissingSessionId,
}

#[derive(Debug, Clone)]
pub struct AcctRequest {
    pub status: AcctStatusType,
    /// Empty for Accounting-On/Off.
    pub session_id: String,
    pub username: String,
    pub nas_ip: IpAddr,
    pub framed_ip: Option<Ipv4Addr>,
    pub calling_station_id: Option<String>,
    pub counters: Counters,
    pub terminate_cause: Option<u32>,
}

impl AcctRequest {
    /// `source` stands in for NAS-IP-Address when the NAS omits it.
    pub fn from_packet(packet: &Packet, source: IpAddr) -> Result<Self, AcctDecodeError> {
        let raw_status = packet
            .u32_attribute(ACCT_STATUS_TYPE)
            .ok_or(AcctDecodeError::MissingStatusType)?;
        let status = AcctStatusType::from_u32(raw_status)
            .ok_or(AcctDecodeError::UnknownStatusType(raw_status))?;
        let session_id = packet.string_attribute(ACCT_SESSION_ID).unwrap_or_default();
        let per_session = !matches!(
            status,
            AcctStatusType::AccountingOn | AcctStatusType::AccountingOff
        );
        if per_session && session_id.is_empty() {
            return Err(AcctDecodeError::MissingSessionId);
        }

        let octets = |low: u8, high: u8| {
            octets_with_gigawords(
                packet.u32_attribute(low).unwrap_or(0),
                packet.u32_attribute(high).unwrap_or(0),
            )
        };

        Ok(Self {
            status,
            session_id,
            username: packet.string_attribute(USER_NAME).unwrap_or_default(),
            nas_ip: packet
                .attribute(NAS_IP_ADDRESS)
                .and_then(|a| a.as_ipv4().ok())
                .map(IpAddr::V4)
                .unwrap_or(source),
            framed_ip: packet.attribute(FRAMED_IP_ADDRESS).and_then(|a| a.as_ipv4().ok()),
            calling_station_id: packet
                .string_attribute(CALLING_STATION_ID)
                .filter(|s| !s.is_empty()),
            counters: Counters {
                input_octets: octets(ACCT_INPUT_OCTETS, ACCT_INPUT_GIGAWORDS),
                output_octets: octets(ACCT_OUTPUT_OCTETS, ACCT_OUTPUT_GIGAWORDS),
                session_time: packet.u32_attribute(ACCT_SESSION_TIME).unwrap_or(0),
            },
            terminate_cause: packet.u32_attribute(ACCT_TERMINATE_CAUSE),
        })
    }
}

/// Who a session belongs to.
enum Owner {
    Voucher(Voucher),
    Subscriber(Subscriber),
    Unknown,
}

pub struct AcctHandler {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceBroadcaster>,
}

impl AcctHandler {
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

    pub async fn handle(&self, request: &AcctRequest, tenant: Option<Uuid>) {
        self.handle_at(request, tenant, Utc::now()).await
    }

    pub async fn handle_at(&self, request: &AcctRequest, tenant: Option<Uuid>, now: DateTime<Utc>) {
        match request.status {
            AcctStatusType::Start => self.start(request, tenant, now).await,
            AcctStatusType::InterimUpdate => self.interim(request, now).await,
            AcctStatusType::Stop => self.stop(request, tenant, now).await,
            AcctStatusType::AccountingOn | AcctStatusType::AccountingOff => {
                info!(
                    nas = %request.nas_ip,
                    status = request.status.as_str(),
                    "NAS accounting state change"
                );
                record(request.status, "ok");
            }
        }
        metrics().sessions_active.set(self.registry.len().await as f64);
    }

    async fn classify(&self, tenant: Option<Uuid>, username: &str) -> Owner {
        match self.store.find_voucher(tenant, username).await {
            Ok(Some(v)) => return Owner::Voucher(v),
            Ok(None) => {}
            Err(err) => warn!(error = %err, user = %username, "voucher lookup failed"),
        }
        match self.store.find_active_subscriber(tenant, username).await {
            Ok(Some(s)) => Owner::Subscriber(s),
            Ok(None) => Owner::Unknown,
            Err(err) => {
                warn!(error = %err, user = %username, "subscriber lookup failed");
                Owner::Unknown
            }
        }
    }

    async fn start(&self, request: &AcctRequest, tenant: Option<Uuid>, now: DateTime<Utc>) {
        let owner = self.classify(tenant, &request.username).await;
        let (tenant_id, customer_id) = match &owner {
            Owner::Voucher(v) => (Some(v.tenant_id), None),
            Owner::Subscriber(s) => (Some(s.tenant_id), Some(s.customer_id)),
            Owner::Unknown => (tenant, None),
        };

        let accounting = AccountingRecord {
            id: Uuid::new_v4(),
            tenant_id,
            session_id: request.session_id.clone(),
            username: request.username.clone(),
            nas_ip: request.nas_ip,
            framed_ip: request.framed_ip,
            calling_station_id: request.calling_station_id.clone(),
            start_time: now,
            stop_time: None,
            input_octets: 0,
            output_octets: 0,
            session_time: 0,
            terminate_cause: None,
        };
        match self.store.insert_accounting(&accounting).await {
            Ok(true) => record(request.status, "ok"),
            Ok(false) => {
                record(request.status, "duplicate");
                if self.registry.get(&request.session_id).await.is_some() {
                    debug!(session = %request.session_id, "retransmitted start; open record kept");
                    return;
                }
            }
            Err(err) => {
                error!(
                    error = %err,
                    session = %request.session_id,
                    user = %request.username,
                    "failed to persist accounting start"
                );
                record(request.status, "error");
            }
        }

        let replaced = self
            .registry
            .start(ActiveSession {
                session_id: request.session_id.clone(),
                username: request.username.clone(),
                nas_ip: request.nas_ip,
                framed_ip: request.framed_ip,
                calling_station_id: request.calling_station_id.clone(),
                started_at: now,
                input_octets: 0,
                output_octets: 0,
                session_time: 0,
                tenant_id,
                customer_id,
                last_update: now,
            })
            .await;
        if replaced.is_some() {
            debug!(session = %request.session_id, "repeated start replaced live session");
        }
        info!(
            session = %request.session_id,
            user = %request.username,
            nas = %request.nas_ip,
            "session started"
        );

        if let Owner::Subscriber(subscriber) = owner {
            if let Err(err) = self
                .store
                .set_customer_online(subscriber.customer_id, request.framed_ip, now)
                .await
            {
                warn!(
                    error = %err,
                    customer = %subscriber.customer_id,
                    "failed to mark customer online"
                );
            }
            self.presence.broadcast_online(
                subscriber.tenant_id,
                subscriber.customer_id,
                &subscriber.username,
                request.framed_ip,
            );
        }
    }

    async fn interim(&self, request: &AcctRequest, now: DateTime<Utc>) {
        match self.store.update_accounting(&request.session_id, request.counters).await {
            Ok(true) => record(request.status, "ok"),
            Ok(false) => {
                debug!(
                    session = %request.session_id,
                    "interim update for session without open record"
                );
                record(request.status, "no_record");
            }
            Err(err) => {
                error!(
                    error = %err,
                    session = %request.session_id,
                    "failed to persist interim update"
                );
                record(request.status, "error");
            }
        }
        if !self.registry.interim(&request.session_id, request.counters, now).await {
            debug!(session = %request.session_id, "interim update for session not in registry");
        }
    }

    async fn stop(&self, request: &AcctRequest, tenant: Option<Uuid>, now: DateTime<Utc>) {
        let cause = request
            .terminate_cause
            .map(terminate_cause_name)
            .unwrap_or_else(|| "Unknown".to_string());
        match self
            .store
            .close_accounting(&request.session_id, now, Some(request.counters), &cause)
            .await
        {
            Ok(true) => record(request.status, "ok"),
            Ok(false) => {
                debug!(session = %request.session_id, "stop for session without open record");
                record(request.status, "no_record");
            }
            Err(err) => {
                error!(
                    error = %err,
                    session = %request.session_id,
                    "failed to persist accounting stop"
                );
                record(request.status, "error");
            }
        }

        let removed = self.registry.stop(&request.session_id).await;
        info!(
            session = %request.session_id,
            user = %request.username,
            cause = %cause,
            input_octets = request.counters.input_octets,
            output_octets = request.counters.output_octets,
            "session stopped"
        );

        // The live session remembers its owner even if the subscriber row
        // has since been deactivated or removed.
        if let Some(session) = &removed {
            if let (Some(tenant_id), Some(customer_id)) = (session.tenant_id, session.customer_id) {
                self.mark_offline(tenant_id, customer_id, &session.username).await;
                return;
            }
        }

        let tenant = removed.as_ref().and_then(|s| s.tenant_id).or(tenant);
        match self.classify(tenant, &request.username).await {
            Owner::Subscriber(subscriber) => {
                let (tenant_id, customer_id) = (subscriber.tenant_id, subscriber.customer_id);
                self.mark_offline(tenant_id, customer_id, &subscriber.username).await;
            }
            Owner::Voucher(v) => self.recheck_voucher(&v, now).await,
            Owner::Unknown => {}
        }
    }

    async fn mark_offline(&self, tenant_id: Uuid, customer_id: Uuid, username: &str) {
        if let Err(err) = self.store.set_customer_offline(customer_id).await {
            warn!(error = %err, customer = %customer_id, "failed to mark customer offline");
        }
        self.presence.broadcast_offline(tenant_id, customer_id, username);
    }

    async fn recheck_voucher(&self, v: &Voucher, now: DateTime<Utc>) {
        let package = match self.store.get_package(v.package_id).await {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, voucher = %v.code, "package lookup failed");
                return;
            }
        };
        if let Err(err) = voucher::expire_if_due(self.store.as_ref(), v, &package, now).await {
            warn!(error = %err, voucher = %v.code, "failed to expire voucher");
        }
    }
}

fn record(status: AcctStatusType, result: &str) {
    metrics()
        .acct_records_total
        .with_label_values(&[status.as_str(), result])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, DurationUnit, Package, VoucherStatus};
    use crate::presence::PresenceEvent;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use isp_radius_proto::client::accounting_request;
    use isp_radius_proto::Attribute;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<SessionRegistry>,
        presence: Arc<PresenceBroadcaster>,
        handler: AcctHandler,
        tenant: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let registry = Arc::new(SessionRegistry::new());
            let presence = Arc::new(PresenceBroadcaster::default());
            let handler = AcctHandler::new(store.clone(), registry.clone(), presence.clone());
            Self {
                store,
                registry,
                presence,
                handler,
                tenant: Uuid::new_v4(),
            }
        }

        async fn subscriber(&self) -> Uuid {
            let customer_id = Uuid::new_v4();
            self.store
                .insert_customer(Customer {
                    id: customer_id,
                    tenant_id: self.tenant,
                    name: "Alice".into(),
                    service_plan_id: None,
                    online: false,
                    last_online_at: None,
                    online_ip: None,
                })
                .await;
            self.store
                .insert_subscriber(Subscriber {
                    id: Uuid::new_v4(),
                    tenant_id: self.tenant,
                    customer_id,
                    username: "alice".into(),
                    password: "s3cret".into(),
                    static_ip: None,
                    expires_at: None,
                    active: true,
                })
                .await;
            customer_id
        }
    }

    fn acct(status: AcctStatusType, session: &str, user: &str) -> AcctRequest {
        AcctRequest {
            status,
            session_id: session.into(),
            username: user.into(),
            nas_ip: "10.0.0.5".parse().unwrap(),
            framed_ip: Some(Ipv4Addr::new(100, 64, 0, 7)),
            calling_station_id: None,
            counters: Counters::default(),
            terminate_cause: None,
        }
    }

    #[tokio::test]
    async fn subscriber_start_interim_stop() {
        let fx = Fixture::new();
        let customer = fx.subscriber().await;
        let mut events = fx.presence.subscribe();

        fx.handler.handle(&acct(AcctStatusType::Start, "s1", "alice"), Some(fx.tenant)).await;
        let live = fx.registry.get("s1").await.unwrap();
        assert_eq!(live.customer_id, Some(customer));
        assert_eq!(live.tenant_id, Some(fx.tenant));
        let stored = fx.store.customer(customer).await.unwrap();
        assert!(stored.online);
        assert_eq!(stored.online_ip, Some(Ipv4Addr::new(100, 64, 0, 7)));
        assert!(matches!(events.recv().await.unwrap(), PresenceEvent::Online { .. }));

        let mut interim = acct(AcctStatusType::InterimUpdate, "s1", "alice");
        interim.counters = Counters {
            input_octets: 10_000,
            output_octets: 20_000,
            session_time: 300,
        };
        fx.handler.handle(&interim, Some(fx.tenant)).await;
        let after = fx.registry.get("s1").await.unwrap();
        assert_eq!(after.counters(), interim.counters);
        assert_eq!(after.started_at, live.started_at);
        assert_eq!(fx.store.accounting_records().await[0].input_octets, 10_000);

        let mut stop = acct(AcctStatusType::Stop, "s1", "alice");
        stop.terminate_cause = Some(1);
        stop.counters = Counters {
            input_octets: 15_000,
            output_octets: 25_000,
            session_time: 400,
        };
        fx.handler.handle(&stop, Some(fx.tenant)).await;
        assert!(fx.registry.get("s1").await.is_none());
        assert!(!fx.store.customer(customer).await.unwrap().online);
        assert_eq!(
            events.recv().await.unwrap(),
            PresenceEvent::Offline {
                tenant_id: fx.tenant,
                customer_id: customer,
                username: "alice".into()
            }
        );

        let records = fx.store.accounting_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].terminate_cause.as_deref(), Some("User-Request"));
        assert_eq!(records[0].output_octets, 25_000);
        assert!(records[0].stop_time.is_some());
    }

    #[tokio::test]
    async fn voucher_session_emits_no_presence_and_expires_on_stop() {
        let fx = Fixture::new();
        let package = Package {
            id: Uuid::new_v4(),
            tenant_id: fx.tenant,
            name: "hour".into(),
            duration_amount: 1,
            duration_unit: DurationUnit::Hours,
            upload_kbps: 256,
            download_kbps: 512,
            device_limit: 1,
            session_limit: 1,
            mac_binding: false,
        };
        fx.store.insert_package(package.clone()).await;
        let activated = Utc::now() - Duration::hours(2);
        let voucher_id = Uuid::new_v4();
        fx.store
            .insert_voucher(Voucher {
                id: voucher_id,
                tenant_id: fx.tenant,
                package_id: package.id,
                code: "HOUR01".into(),
                password_hash: String::new(),
                status: VoucherStatus::Active,
                activated_at: Some(activated),
                expires_at: Some(activated + Duration::hours(1)),
                mac_address: None,
            })
            .await;
        let mut events = fx.presence.subscribe();

        fx.handler.handle(&acct(AcctStatusType::Start, "v1", "HOUR01"), Some(fx.tenant)).await;
        assert_eq!(fx.registry.count_by_username(Some(fx.tenant), "HOUR01").await, 1);
        assert!(fx.registry.get("v1").await.unwrap().customer_id.is_none());

        fx.handler.handle(&acct(AcctStatusType::Stop, "v1", "HOUR01"), Some(fx.tenant)).await;
        assert!(fx.registry.is_empty().await);
        assert_eq!(fx.store.voucher(voucher_id).await.unwrap().status, VoucherStatus::Expired);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_without_start_is_tolerated() {
        let fx = Fixture::new();
        fx.handler.handle(&acct(AcctStatusType::Stop, "ghost", "nobody"), None).await;
        fx.handler
            .handle(&acct(AcctStatusType::InterimUpdate, "ghost", "nobody"), None)
            .await;
        assert!(fx.registry.is_empty().await);
        assert!(fx.store.accounting_records().await.is_empty());
    }

    #[tokio::test]
    async fn stop_only_affects_its_own_session() {
        let fx = Fixture::new();
        fx.handler.handle(&acct(AcctStatusType::Start, "a", "guest"), None).await;
        fx.handler.handle(&acct(AcctStatusType::Start, "b", "guest"), None).await;
        fx.handler.handle(&acct(AcctStatusType::Stop, "a", "guest"), None).await;

        assert!(fx.registry.get("b").await.is_some());
        let records = fx.store.accounting_records().await;
        let b = records.iter().find(|r| r.session_id == "b").unwrap();
        assert!(b.stop_time.is_none());
    }

    #[tokio::test]
    async fn retransmitted_start_keeps_one_record() {
        let fx = Fixture::new();
        let customer = fx.subscriber().await;
        let mut events = fx.presence.subscribe();

        fx.handler.handle(&acct(AcctStatusType::Start, "s1", "alice"), Some(fx.tenant)).await;
        let first = fx.registry.get("s1").await.unwrap();
        fx.handler.handle(&acct(AcctStatusType::Start, "s1", "alice"), Some(fx.tenant)).await;
        assert_eq!(fx.store.accounting_records().await.len(), 1);
        assert_eq!(fx.registry.get("s1").await.unwrap().started_at, first.started_at);
        assert!(matches!(events.recv().await.unwrap(), PresenceEvent::Online { .. }));
        assert!(events.try_recv().is_err());

        fx.handler.handle(&acct(AcctStatusType::Stop, "s1", "alice"), Some(fx.tenant)).await;
        let records = fx.store.accounting_records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].stop_time.is_some());
        assert!(!fx.store.customer(customer).await.unwrap().online);
    }

    #[tokio::test]
    async fn stop_marks_customer_offline_after_subscriber_deactivated() {
        let fx = Fixture::new();
        let customer = fx.subscriber().await;
        let mut events = fx.presence.subscribe();

        fx.handler.handle(&acct(AcctStatusType::Start, "s1", "alice"), Some(fx.tenant)).await;
        assert!(fx.store.customer(customer).await.unwrap().online);
        assert!(matches!(events.recv().await.unwrap(), PresenceEvent::Online { .. }));

        fx.store.set_subscriber_active("alice", false).await;
        fx.handler.handle(&acct(AcctStatusType::Stop, "s1", "alice"), Some(fx.tenant)).await;

        assert!(!fx.store.customer(customer).await.unwrap().online);
        assert_eq!(
            events.recv().await.unwrap(),
            PresenceEvent::Offline {
                tenant_id: fx.tenant,
                customer_id: customer,
                username: "alice".into()
            }
        );
    }

    #[test]
    fn decode_with_gigawords_and_fallback_nas_ip() {
        let mut packet =
            accounting_request(3, AcctStatusType::InterimUpdate, "s9", "alice").unwrap();
        packet.add_attribute(Attribute::integer(ACCT_INPUT_OCTETS, 5));
        packet.add_attribute(Attribute::integer(ACCT_INPUT_GIGAWORDS, 1));
        packet.add_attribute(Attribute::integer(ACCT_OUTPUT_OCTETS, 7));
        packet.add_attribute(Attribute::integer(ACCT_SESSION_TIME, 42));

        let source: IpAddr = "192.0.2.7".parse().unwrap();
        let request = AcctRequest::from_packet(&packet, source).unwrap();
        assert_eq!(request.counters.input_octets, (1u64 << 32) + 5);
        assert_eq!(request.counters.output_octets, 7);
        assert_eq!(request.counters.session_time, 42);
        assert_eq!(request.nas_ip, source);
    }

    #[test]
    fn decode_requires_session_id_for_session_records() {
        let mut packet = Packet::new(isp_radius_proto::Code::AccountingRequest, 1, [0u8; 16]);
        packet.add_attribute(Attribute::integer(ACCT_STATUS_TYPE, 1));
        let source: IpAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(
            AcctRequest::from_packet(&packet, source).unwrap_err(),
            AcctDecodeError::MissingSessionId
        );

        let mut on = Packet::new(isp_radius_proto::Code::AccountingRequest, 2, [0u8; 16]);
        on.add_attribute(Attribute::integer(ACCT_STATUS_TYPE, 7));
        assert_eq!(
            AcctRequest::from_packet(&on, source).unwrap().status,
            AcctStatusType::AccountingOn
        );

        let mut odd = Packet::new(isp_radius_proto::Code::AccountingRequest, 3, [0u8; 16]);
        odd.add_attribute(Attribute::integer(ACCT_STATUS_TYPE, 15));
        assert_eq!(
            AcctRequest::from_packet(&odd, source).unwrap_err(),
            AcctDecodeError::UnknownStatusType(15)
        );
    }
}
