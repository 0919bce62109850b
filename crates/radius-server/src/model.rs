// SPDX-License-Identifier: AGPL-3.0-only
//! Persistent records the AAA core reads and updates.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nas {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub ip: IpAddr,
    pub secret: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub service_plan_id: Option<Uuid>,
    pub online: bool,
    pub last_online_at: Option<DateTime<Utc>>,
    pub online_ip: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstSettings {
    pub burst_upload_kbps: u32,
    pub burst_download_kbps: u32,
    pub threshold_upload_kbps: u32,
    pub threshold_download_kbps: u32,
    pub burst_time_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub upload_mbps: u32,
    pub download_mbps: u32,
    pub burst: Option<BurstSettings>,
}

/// PPPoE credential. The password is stored and compared in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub username: String,
    pub password: String,
    pub static_ip: Option<Ipv4Addr>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    Unused,
    Active,
    Expired,
    Used,
}

impl VoucherStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Used => "used",
        }
    }
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoucherStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unused" => Ok(Self::Unused),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "used" => Ok(Self::Used),
            other => Err(format!("unknown voucher status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub package_id: Uuid,
    pub code: String,
    pub password_hash: String,
    pub status: VoucherStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl DurationUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
        }
    }
}

impl FromStr for DurationUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_end_matches('s') {
            "minute" => Ok(Self::Minutes),
            "hour" => Ok(Self::Hours),
            "day" => Ok(Self::Days),
            "week" => Ok(Self::Weeks),
            "month" => Ok(Self::Months),
            _ => Err(format!("unknown duration unit '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub duration_amount: u32,
    pub duration_unit: DurationUnit,
    pub upload_kbps: u32,
    pub download_kbps: u32,
    /// 0 = unlimited.
    pub device_limit: u32,
    /// 0 = unlimited.
    pub session_limit: u32,
    pub mac_binding: bool,
}

impl Package {
    /// Add the package validity to `start`. Months are calendar months;
    /// `None` only on chrono overflow.
    pub fn expiry_from(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let amount = i64::from(self.duration_amount);
        match self.duration_unit {
            DurationUnit::Minutes => start.checked_add_signed(Duration::minutes(amount)),
            DurationUnit::Hours => start.checked_add_signed(Duration::hours(amount)),
            DurationUnit::Days => start.checked_add_signed(Duration::days(amount)),
            DurationUnit::Weeks => start.checked_add_signed(Duration::weeks(amount)),
            DurationUnit::Months => start.checked_add_months(Months::new(self.duration_amount)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingRecord {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub session_id: String,
    pub username: String,
    pub nas_ip: IpAddr,
    pub framed_ip: Option<Ipv4Addr>,
    pub calling_station_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub input_octets: u64,
    pub output_octets: u64,
    pub session_time: u32,
    pub terminate_cause: Option<String>,
}
