// SPDX-License-Identifier: AGPL-3.0-only
//! Voucher expiry rules and password hashing.
//!
//! Status only moves forward: unused → active → expired. `used` is set by the
//! platform and is treated like expired here.

use crate::model::{Package, Voucher, VoucherStatus};
use crate::store::Store;
use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use tracing::info;

/// Effective expiry: the stored timestamp when present, otherwise activation
/// plus package duration. An unactivated voucher has no expiry yet.
pub fn computed_expiry(voucher: &Voucher, package: &Package) -> Option<DateTime<Utc>> {
    voucher
        .expires_at
        .or_else(|| voucher.activated_at.and_then(|at| package.expiry_from(at)))
}

pub fn is_expired(voucher: &Voucher, package: &Package, now: DateTime<Utc>) -> bool {
    match voucher.status {
        VoucherStatus::Expired | VoucherStatus::Used => true,
        VoucherStatus::Unused => false,
        VoucherStatus::Active => computed_expiry(voucher, package).is_some_and(|at| at <= now),
    }
}

/// Flip an active voucher to expired when its computed expiry has passed.
/// Returns whether the stored status changed.
pub async fn expire_if_due(
    store: &dyn Store,
    voucher: &Voucher,
    package: &Package,
    now: DateTime<Utc>,
) -> Result<bool> {
    if voucher.status != VoucherStatus::Active || !is_expired(voucher, package, now) {
        return Ok(false);
    }
    let flipped = store.expire_voucher(voucher.id).await?;
    if flipped {
        info!(voucher = %voucher.code, tenant = %voucher.tenant_id, "voucher expired");
    }
    Ok(flipped)
}

/// Check a presented password against an argon2 PHC string. A malformed hash
/// never verifies.
pub fn verify_password(phc: &str, password: &[u8]) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default().verify_password(password, &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Produce an argon2id PHC string in the format the platform stores.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    openssl::rand::rand_bytes(&mut salt)?;
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("encoding salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("hashing password: {e}"))?;
    Ok(hash.to_string())
}
