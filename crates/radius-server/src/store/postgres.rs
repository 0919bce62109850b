// SPDX-License-Identifier: AGPL-3.0-only
use super::{Counters, Store};
use crate::model::{
    AccountingRecord, BurstSettings, Customer, Nas, Package, ServicePlan, Subscriber, Voucher,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Executor, FromRow, PgPool};
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nas (
  id UUID PRIMARY KEY,
  tenant_id UUID NOT NULL,
  name TEXT NOT NULL,
  ip_address TEXT NOT NULL,
  secret TEXT NOT NULL,
  is_active BOOLEAN NOT NULL DEFAULT true
);

CREATE TABLE IF NOT EXISTS service_plans (
  id UUID PRIMARY KEY,
  tenant_id UUID NOT NULL,
  name TEXT NOT NULL,
  upload_mbps INTEGER NOT NULL,
  download_mbps INTEGER NOT NULL,
  burst_enabled BOOLEAN NOT NULL DEFAULT false,
  burst_upload_kbps INTEGER NOT NULL DEFAULT 0,
  burst_download_kbps INTEGER NOT NULL DEFAULT 0,
  threshold_upload_kbps INTEGER NOT NULL DEFAULT 0,
  threshold_download_kbps INTEGER NOT NULL DEFAULT 0,
  burst_time_secs INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS customers (
  id UUID PRIMARY KEY,
  tenant_id UUID NOT NULL,
  name TEXT NOT NULL,
  service_plan_id UUID REFERENCES service_plans (id),
  is_online BOOLEAN NOT NULL DEFAULT false,
  last_online_at TIMESTAMPTZ,
  online_ip TEXT
);

CREATE TABLE IF NOT EXISTS subscribers (
  id UUID PRIMARY KEY,
  tenant_id UUID NOT NULL,
  customer_id UUID NOT NULL REFERENCES customers (id),
  username TEXT NOT NULL,
  password TEXT NOT NULL,
  static_ip TEXT,
  expires_at TIMESTAMPTZ,
  is_active BOOLEAN NOT NULL DEFAULT true
);

CREATE TABLE IF NOT EXISTS packages (
  id UUID PRIMARY KEY,
  tenant_id UUID NOT NULL,
  name TEXT NOT NULL,
  duration_amount INTEGER NOT NULL,
  duration_unit TEXT NOT NULL,
  upload_kbps INTEGER NOT NULL,
  download_kbps INTEGER NOT NULL,
  device_limit INTEGER NOT NULL DEFAULT 1,
  session_limit INTEGER NOT NULL DEFAULT 1,
  mac_binding BOOLEAN NOT NULL DEFAULT false
);

CREATE TABLE IF NOT EXISTS vouchers (
  id UUID PRIMARY KEY,
  tenant_id UUID NOT NULL,
  package_id UUID NOT NULL REFERENCES packages (id),
  code TEXT NOT NULL,
  password_hash TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'unused',
  activated_at TIMESTAMPTZ,
  expires_at TIMESTAMPTZ,
  mac_address TEXT,
  UNIQUE (tenant_id, code)
);

CREATE TABLE IF NOT EXISTS accounting_records (
  id UUID PRIMARY KEY,
  tenant_id UUID,
  session_id TEXT NOT NULL,
  username TEXT NOT NULL,
  nas_ip TEXT NOT NULL,
  framed_ip TEXT,
  calling_station_id TEXT,
  start_time TIMESTAMPTZ NOT NULL,
  stop_time TIMESTAMPTZ,
  input_octets BIGINT NOT NULL DEFAULT 0,
  output_octets BIGINT NOT NULL DEFAULT 0,
  session_time INTEGER NOT NULL DEFAULT 0,
  terminate_cause TEXT
);

CREATE INDEX IF NOT EXISTS accounting_records_open_session
  ON accounting_records (session_id) WHERE stop_time IS NULL;
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    /// Create any missing tables. Existing platform tables are left alone.
    pub async fn migrate(&self) -> Result<()> {
        self.pool.execute(SCHEMA).await.context("applying schema")?;
        Ok(())
    }
}

#[derive(FromRow)]
struct NasRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    ip_address: String,
    secret: String,
    is_active: bool,
}

impl TryFrom<NasRow> for Nas {
    type Error = anyhow::Error;

    fn try_from(row: NasRow) -> Result<Self> {
        let ip = row
            .ip_address
            .trim()
            .parse()
            .with_context(|| format!("nas {} has invalid ip '{}'", row.id, row.ip_address))?;
        Ok(Nas {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            ip,
            secret: row.secret,
            active: row.is_active,
        })
    }
}

#[derive(FromRow)]
struct CustomerRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    service_plan_id: Option<Uuid>,
    is_online: bool,
    last_online_at: Option<DateTime<Utc>>,
    online_ip: Option<String>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            service_plan_id: row.service_plan_id,
            online: row.is_online,
            last_online_at: row.last_online_at,
            online_ip: row.online_ip.and_then(|ip| ip.parse().ok()),
        }
    }
}

#[derive(FromRow)]
struct ServicePlanRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    upload_mbps: i32,
    download_mbps: i32,
    burst_enabled: bool,
    burst_upload_kbps: i32,
    burst_download_kbps: i32,
    threshold_upload_kbps: i32,
    threshold_download_kbps: i32,
    burst_time_secs: i32,
}

impl From<ServicePlanRow> for ServicePlan {
    fn from(row: ServicePlanRow) -> Self {
        let burst = row.burst_enabled.then(|| BurstSettings {
            burst_upload_kbps: non_negative(row.burst_upload_kbps),
            burst_download_kbps: non_negative(row.burst_download_kbps),
            threshold_upload_kbps: non_negative(row.threshold_upload_kbps),
            threshold_download_kbps: non_negative(row.threshold_download_kbps),
            burst_time_secs: non_negative(row.burst_time_secs),
        });
        ServicePlan {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            upload_mbps: non_negative(row.upload_mbps),
            download_mbps: non_negative(row.download_mbps),
            burst,
        }
    }
}

#[derive(FromRow)]
struct SubscriberRow {
    id: Uuid,
    tenant_id: Uuid,
    customer_id: Uuid,
    username: String,
    password: String,
    static_ip: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl From<SubscriberRow> for Subscriber {
    fn from(row: SubscriberRow) -> Self {
        Subscriber {
            id: row.id,
            tenant_id: row.tenant_id,
            customer_id: row.customer_id,
            username: row.username,
            password: row.password,
            static_ip: row.static_ip.and_then(|ip| ip.trim().parse().ok()),
            expires_at: row.expires_at,
            active: row.is_active,
        }
    }
}

#[derive(FromRow)]
struct PackageRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    duration_amount: i32,
    duration_unit: String,
    upload_kbps: i32,
    download_kbps: i32,
    device_limit: i32,
    session_limit: i32,
    mac_binding: bool,
}

impl TryFrom<PackageRow> for Package {
    type Error = anyhow::Error;

    fn try_from(row: PackageRow) -> Result<Self> {
        let duration_unit = row
            .duration_unit
            .parse()
            .map_err(|e: String| anyhow::anyhow!("package {}: {e}", row.id))?;
        Ok(Package {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            duration_amount: non_negative(row.duration_amount),
            duration_unit,
            upload_kbps: non_negative(row.upload_kbps),
            download_kbps: non_negative(row.download_kbps),
            device_limit: non_negative(row.device_limit),
            session_limit: non_negative(row.session_limit),
            mac_binding: row.mac_binding,
        })
    }
}

#[derive(FromRow)]
struct VoucherRow {
    id: Uuid,
    tenant_id: Uuid,
    package_id: Uuid,
    code: String,
    password_hash: String,
    status: String,
    activated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    mac_address: Option<String>,
}

impl TryFrom<VoucherRow> for Voucher {
    type Error = anyhow::Error;

    fn try_from(row: VoucherRow) -> Result<Self> {
        let status = row
            .status
            .parse()
            .map_err(|e: String| anyhow::anyhow!("voucher {}: {e}", row.id))?;
        Ok(Voucher {
            id: row.id,
            tenant_id: row.tenant_id,
            package_id: row.package_id,
            code: row.code,
            password_hash: row.password_hash,
            status,
            activated_at: row.activated_at,
            expires_at: row.expires_at,
            mac_address: row.mac_address,
        })
    }
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn octets_column(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn seconds_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl Store for PgStore {
    async fn find_nas_by_ip(&self, ip: IpAddr) -> Result<Option<Nas>> {
        let row: Option<NasRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, name, ip_address, secret, is_active
               FROM nas WHERE ip_address = $1 AND is_active LIMIT 1"#,
        )
        .bind(ip.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Nas::try_from).transpose()
    }

    async fn any_active_nas(&self) -> Result<Option<Nas>> {
        let row: Option<NasRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, name, ip_address, secret, is_active
               FROM nas WHERE is_active LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Nas::try_from).transpose()
    }

    async fn find_active_subscriber(
        &self,
        tenant: Option<Uuid>,
        username: &str,
    ) -> Result<Option<Subscriber>> {
        let row: Option<SubscriberRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, customer_id, username, password, static_ip,
                      expires_at, is_active
               FROM subscribers
               WHERE username = $1 AND is_active AND ($2::uuid IS NULL OR tenant_id = $2)
               LIMIT 1"#,
        )
        .bind(username)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Subscriber::from))
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, name, service_plan_id, is_online, last_online_at, online_ip
               FROM customers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Customer::from))
    }

    async fn get_service_plan(&self, id: Uuid) -> Result<Option<ServicePlan>> {
        let row: Option<ServicePlanRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, name, upload_mbps, download_mbps, burst_enabled,
                      burst_upload_kbps, burst_download_kbps, threshold_upload_kbps,
                      threshold_download_kbps, burst_time_secs
               FROM service_plans WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ServicePlan::from))
    }

    async fn set_customer_online(
        &self,
        id: Uuid,
        ip: Option<Ipv4Addr>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE customers
               SET is_online = true, last_online_at = $2, online_ip = COALESCE($3, online_ip)
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(at)
        .bind(ip.map(|ip| ip.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_customer_offline(&self, id: Uuid) -> Result<()> {
        sqlx::query(r#"UPDATE customers SET is_online = false, online_ip = NULL WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_voucher(&self, tenant: Option<Uuid>, code: &str) -> Result<Option<Voucher>> {
        let row: Option<VoucherRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, package_id, code, password_hash, status,
                      activated_at, expires_at, mac_address
               FROM vouchers
               WHERE code = $1 AND ($2::uuid IS NULL OR tenant_id = $2)
               LIMIT 1"#,
        )
        .bind(code)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Voucher::try_from).transpose()
    }

    async fn get_package(&self, id: Uuid) -> Result<Option<Package>> {
        let row: Option<PackageRow> = sqlx::query_as(
            r#"SELECT id, tenant_id, name, duration_amount, duration_unit, upload_kbps,
                      download_kbps, device_limit, session_limit, mac_binding
               FROM packages WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Package::try_from).transpose()
    }

    async fn activate_voucher(
        &self,
        id: Uuid,
        activated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        mac_address: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE vouchers
               SET status = 'active', activated_at = $2, expires_at = $3, mac_address = $4
               WHERE id = $1 AND status = 'unused'"#,
        )
        .bind(id)
        .bind(activated_at)
        .bind(expires_at)
        .bind(mac_address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn bind_voucher_mac(&self, id: Uuid, mac_address: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE vouchers SET mac_address = $2 WHERE id = $1 AND mac_address IS NULL"#,
        )
        .bind(id)
        .bind(mac_address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_voucher(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE vouchers SET status = 'expired' WHERE id = $1 AND status = 'active'"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_accounting(&self, record: &AccountingRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO accounting_records
               (id, tenant_id, session_id, username, nas_ip, framed_ip, calling_station_id,
                start_time, stop_time, input_octets, output_octets, session_time, terminate_cause)
               SELECT $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13
               WHERE NOT EXISTS (
                 SELECT 1 FROM accounting_records WHERE session_id = $3 AND stop_time IS NULL
               )"#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(&record.session_id)
        .bind(&record.username)
        .bind(record.nas_ip.to_string())
        .bind(record.framed_ip.map(|ip| ip.to_string()))
        .bind(record.calling_station_id.as_deref())
        .bind(record.start_time)
        .bind(record.stop_time)
        .bind(octets_column(record.input_octets))
        .bind(octets_column(record.output_octets))
        .bind(seconds_column(record.session_time))
        .bind(record.terminate_cause.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_accounting(&self, session_id: &str, counters: Counters) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE accounting_records
               SET input_octets = $2, output_octets = $3, session_time = $4
               WHERE session_id = $1 AND stop_time IS NULL"#,
        )
        .bind(session_id)
        .bind(octets_column(counters.input_octets))
        .bind(octets_column(counters.output_octets))
        .bind(seconds_column(counters.session_time))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn close_accounting(
        &self,
        session_id: &str,
        stop_time: DateTime<Utc>,
        counters: Option<Counters>,
        terminate_cause: &str,
    ) -> Result<bool> {
        let result = match counters {
            Some(c) => {
                sqlx::query(
                    r#"UPDATE accounting_records
                       SET stop_time = $2, terminate_cause = $3,
                           input_octets = $4, output_octets = $5, session_time = $6
                       WHERE session_id = $1 AND stop_time IS NULL"#,
                )
                .bind(session_id)
                .bind(stop_time)
                .bind(terminate_cause)
                .bind(octets_column(c.input_octets))
                .bind(octets_column(c.output_octets))
                .bind(seconds_column(c.session_time))
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"UPDATE accounting_records SET stop_time = $2, terminate_cause = $3
                       WHERE session_id = $1 AND stop_time IS NULL"#,
                )
                .bind(session_id)
                .bind(stop_time)
                .bind(terminate_cause)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }
}
