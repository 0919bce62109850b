// SPDX-License-Identifier: AGPL-3.0-only
//! Persistence seam for the AAA core.
//!
//! The platform owns the full CRUD surface for these records; the RADIUS
//! server only needs the reads and narrow updates listed here. Two backends
//! implement it:
//! - [`PgStore`]: the platform's Postgres database (sqlx)
//! - [`MemoryStore`]: in-process tables for tests and database-less runs

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::model::{AccountingRecord, Customer, Nas, Package, ServicePlan, Subscriber, Voucher};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

/// Counter snapshot carried by Interim-Update and Stop records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub input_octets: u64,
    pub output_octets: u64,
    pub session_time: u32,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Active NAS whose address matches `ip`.
    async fn find_nas_by_ip(&self, ip: IpAddr) -> Result<Option<Nas>>;

    /// Any active NAS, used by the secret fallback tier.
    async fn any_active_nas(&self) -> Result<Option<Nas>>;

    /// Active subscriber by PPPoE username. `tenant` narrows the search when known.
    async fn find_active_subscriber(
        &self,
        tenant: Option<Uuid>,
        username: &str,
    ) -> Result<Option<Subscriber>>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>>;

    async fn get_service_plan(&self, id: Uuid) -> Result<Option<ServicePlan>>;

    async fn set_customer_online(
        &self,
        id: Uuid,
        ip: Option<Ipv4Addr>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_customer_offline(&self, id: Uuid) -> Result<()>;

    /// Voucher by code. `tenant` narrows the search when known.
    async fn find_voucher(&self, tenant: Option<Uuid>, code: &str) -> Result<Option<Voucher>>;

    async fn get_package(&self, id: Uuid) -> Result<Option<Package>>;

    /// Flip `unused` → `active` and bind the device. Returns `false` when the
    /// voucher was no longer unused (another request won the race).
    async fn activate_voucher(
        &self,
        id: Uuid,
        activated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        mac_address: Option<&str>,
    ) -> Result<bool>;

    /// Record the first device seen on a voucher that was activated without
    /// one. Returns `false` when a device is already bound.
    async fn bind_voucher_mac(&self, id: Uuid, mac_address: &str) -> Result<bool>;

    /// Flip `active` → `expired`. Returns `false` when the status was anything else.
    async fn expire_voucher(&self, id: Uuid) -> Result<bool>;

    /// Open a record for `record.session_id`. Returns `false` without writing
    /// when an open record for that session already exists (retransmitted Start).
    async fn insert_accounting(&self, record: &AccountingRecord) -> Result<bool>;

    /// Returns `false` when no open record exists for the session.
    async fn update_accounting(&self, session_id: &str, counters: Counters) -> Result<bool>;

    /// Returns `false` when no open record exists for the session.
    async fn close_accounting(
        &self,
        session_id: &str,
        stop_time: DateTime<Utc>,
        counters: Option<Counters>,
        terminate_cause: &str,
    ) -> Result<bool>;
}
