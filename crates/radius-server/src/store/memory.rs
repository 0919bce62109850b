// SPDX-License-Identifier: AGPL-3.0-only
use super::{Counters, Store};
use crate::model::{
    AccountingRecord, Customer, Nas, Package, ServicePlan, Subscriber, Voucher, VoucherStatus,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    nas: Vec<Nas>,
    customers: HashMap<Uuid, Customer>,
    plans: HashMap<Uuid, ServicePlan>,
    subscribers: Vec<Subscriber>,
    vouchers: HashMap<Uuid, Voucher>,
    packages: HashMap<Uuid, Package>,
    accounting: Vec<AccountingRecord>,
}

/// In-process store. Seeded through the `insert_*` helpers; the platform's
/// CRUD surface is not reproduced.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_nas(&self, nas: Nas) {
        self.tables.write().await.nas.push(nas);
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.tables.write().await.customers.insert(customer.id, customer);
    }

    pub async fn insert_service_plan(&self, plan: ServicePlan) {
        self.tables.write().await.plans.insert(plan.id, plan);
    }

    pub async fn insert_subscriber(&self, subscriber: Subscriber) {
        self.tables.write().await.subscribers.push(subscriber);
    }

    pub async fn insert_package(&self, package: Package) {
        self.tables.write().await.packages.insert(package.id, package);
    }

    pub async fn insert_voucher(&self, voucher: Voucher) {
        self.tables.write().await.vouchers.insert(voucher.id, voucher);
    }

    /// Flip the active flag on every subscriber row with `username`.
    pub async fn set_subscriber_active(&self, username: &str, active: bool) {
        let mut tables = self.tables.write().await;
        for subscriber in tables.subscribers.iter_mut().filter(|s| s.username == username) {
            subscriber.active = active;
        }
    }

    pub async fn voucher(&self, id: Uuid) -> Option<Voucher> {
        self.tables.read().await.vouchers.get(&id).cloned()
    }

    pub async fn customer(&self, id: Uuid) -> Option<Customer> {
        self.tables.read().await.customers.get(&id).cloned()
    }

    pub async fn accounting_records(&self) -> Vec<AccountingRecord> {
        self.tables.read().await.accounting.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_nas_by_ip(&self, ip: IpAddr) -> Result<Option<Nas>> {
        let tables = self.tables.read().await;
        Ok(tables.nas.iter().find(|n| n.active && n.ip == ip).cloned())
    }

    async fn any_active_nas(&self) -> Result<Option<Nas>> {
        let tables = self.tables.read().await;
        Ok(tables.nas.iter().find(|n| n.active).cloned())
    }

    async fn find_active_subscriber(
        &self,
        tenant: Option<Uuid>,
        username: &str,
    ) -> Result<Option<Subscriber>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscribers
            .iter()
            .find(|s| {
                s.active && s.username == username && tenant.map_or(true, |t| s.tenant_id == t)
            })
            .cloned())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>> {
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn get_service_plan(&self, id: Uuid) -> Result<Option<ServicePlan>> {
        Ok(self.tables.read().await.plans.get(&id).cloned())
    }

    async fn set_customer_online(
        &self,
        id: Uuid,
        ip: Option<Ipv4Addr>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(customer) = self.tables.write().await.customers.get_mut(&id) {
            customer.online = true;
            customer.last_online_at = Some(at);
            if ip.is_some() {
                customer.online_ip = ip;
            }
        }
        Ok(())
    }

    async fn set_customer_offline(&self, id: Uuid) -> Result<()> {
        if let Some(customer) = self.tables.write().await.customers.get_mut(&id) {
            customer.online = false;
            customer.online_ip = None;
        }
        Ok(())
    }

    async fn find_voucher(&self, tenant: Option<Uuid>, code: &str) -> Result<Option<Voucher>> {
        let tables = self.tables.read().await;
        Ok(tables
            .vouchers
            .values()
            .find(|v| v.code == code && tenant.map_or(true, |t| v.tenant_id == t))
            .cloned())
    }

    async fn get_package(&self, id: Uuid) -> Result<Option<Package>> {
        Ok(self.tables.read().await.packages.get(&id).cloned())
    }

    async fn activate_voucher(
        &self,
        id: Uuid,
        activated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        mac_address: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.vouchers.get_mut(&id) {
            Some(voucher) if voucher.status == VoucherStatus::Unused => {
                voucher.status = VoucherStatus::Active;
                voucher.activated_at = Some(activated_at);
                voucher.expires_at = expires_at;
                voucher.mac_address = mac_address.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn bind_voucher_mac(&self, id: Uuid, mac_address: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.vouchers.get_mut(&id) {
            Some(voucher) if voucher.mac_address.is_none() => {
                voucher.mac_address = Some(mac_address.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_voucher(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.vouchers.get_mut(&id) {
            Some(voucher) if voucher.status == VoucherStatus::Active => {
                voucher.status = VoucherStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_accounting(&self, record: &AccountingRecord) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let open = tables
            .accounting
            .iter()
            .any(|r| r.session_id == record.session_id && r.stop_time.is_none());
        if open {
            return Ok(false);
        }
        tables.accounting.push(record.clone());
        Ok(true)
    }

    async fn update_accounting(&self, session_id: &str, counters: Counters) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let open = tables
            .accounting
            .iter_mut()
            .rev()
            .find(|r| r.session_id == session_id && r.stop_time.is_none());
        Ok(match open {
            Some(record) => {
                record.input_octets = counters.input_octets;
                record.output_octets = counters.output_octets;
                record.session_time = counters.session_time;
                true
            }
            None => false,
        })
    }

    async fn close_accounting(
        &self,
        session_id: &str,
        stop_time: DateTime<Utc>,
        counters: Option<Counters>,
        terminate_cause: &str,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let open = tables
            .accounting
            .iter_mut()
            .rev()
            .find(|r| r.session_id == session_id && r.stop_time.is_none());
        Ok(match open {
            Some(record) => {
                record.stop_time = Some(stop_time);
                record.terminate_cause = Some(terminate_cause.to_string());
                if let Some(c) = counters {
                    record.input_octets = c.input_octets;
                    record.output_octets = c.output_octets;
                    record.session_time = c.session_time;
                }
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DurationUnit, VoucherStatus};

    fn voucher(status: VoucherStatus) -> Voucher {
        Voucher {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            code: "ABC123".into(),
            password_hash: String::new(),
            status,
            activated_at: None,
            expires_at: None,
            mac_address: None,
        }
    }

    #[tokio::test]
    async fn activation_happens_once() {
        let store = MemoryStore::new();
        let v = voucher(VoucherStatus::Unused);
        let id = v.id;
        store.insert_voucher(v).await;

        let now = Utc::now();
        assert!(store.activate_voucher(id, now, None, Some("AA:BB")).await.unwrap());
        assert!(!store.activate_voucher(id, now, None, Some("CC:DD")).await.unwrap());
        let stored = store.voucher(id).await.unwrap();
        assert_eq!(stored.status, VoucherStatus::Active);
        assert_eq!(stored.mac_address.as_deref(), Some("AA:BB"));
    }

    #[tokio::test]
    async fn expire_never_regresses() {
        let store = MemoryStore::new();
        let unused = voucher(VoucherStatus::Unused);
        let used = voucher(VoucherStatus::Used);
        let (unused_id, used_id) = (unused.id, used.id);
        store.insert_voucher(unused).await;
        store.insert_voucher(used).await;

        assert!(!store.expire_voucher(unused_id).await.unwrap());
        assert!(!store.expire_voucher(used_id).await.unwrap());
        assert_eq!(store.voucher(used_id).await.unwrap().status, VoucherStatus::Used);
    }

    #[tokio::test]
    async fn tenant_scopes_voucher_lookup() {
        let store = MemoryStore::new();
        let v = voucher(VoucherStatus::Unused);
        let tenant = v.tenant_id;
        store.insert_voucher(v).await;
        store
            .insert_package(Package {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                name: "day".into(),
                duration_amount: 1,
                duration_unit: DurationUnit::Days,
                upload_kbps: 1,
                download_kbps: 1,
                device_limit: 1,
                session_limit: 1,
                mac_binding: false,
            })
            .await;

        assert!(store.find_voucher(Some(tenant), "ABC123").await.unwrap().is_some());
        assert!(store.find_voucher(None, "ABC123").await.unwrap().is_some());
        assert!(store.find_voucher(Some(Uuid::new_v4()), "ABC123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_targets_open_record_only() {
        let store = MemoryStore::new();
        let record = AccountingRecord {
            id: Uuid::new_v4(),
            tenant_id: None,
            session_id: "s1".into(),
            username: "alice".into(),
            nas_ip: "10.0.0.5".parse().unwrap(),
            framed_ip: None,
            calling_station_id: None,
            start_time: Utc::now(),
            stop_time: None,
            input_octets: 0,
            output_octets: 0,
            session_time: 0,
            terminate_cause: None,
        };
        store.insert_accounting(&record).await.unwrap();
        assert!(store.close_accounting("s1", Utc::now(), None, "User-Request").await.unwrap());
        assert!(!store.close_accounting("s1", Utc::now(), None, "User-Request").await.unwrap());
        assert!(!store.update_accounting("s1", Counters::default()).await.unwrap());
    }

    #[tokio::test]
    async fn second_open_record_for_a_session_is_refused() {
        let store = MemoryStore::new();
        let record = |id| AccountingRecord {
            id,
            tenant_id: None,
            session_id: "s1".into(),
            username: "alice".into(),
            nas_ip: "10.0.0.5".parse().unwrap(),
            framed_ip: None,
            calling_station_id: None,
            start_time: Utc::now(),
            stop_time: None,
            input_octets: 0,
            output_octets: 0,
            session_time: 0,
            terminate_cause: None,
        };
        assert!(store.insert_accounting(&record(Uuid::new_v4())).await.unwrap());
        assert!(!store.insert_accounting(&record(Uuid::new_v4())).await.unwrap());
        assert_eq!(store.accounting_records().await.len(), 1);

        // A closed session id can be reused by a later session.
        assert!(store.close_accounting("s1", Utc::now(), None, "User-Request").await.unwrap());
        assert!(store.insert_accounting(&record(Uuid::new_v4())).await.unwrap());
        assert_eq!(store.accounting_records().await.len(), 2);
    }
}
