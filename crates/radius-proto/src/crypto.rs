// SPDX-License-Identifier: AGPL-3.0-only
//! Shared-secret MD5 constructions from RFC 2865/2866: User-Password hiding
//! and the request/response authenticators.

use crate::error::{PacketError, Result};
use openssl::hash::{hash, MessageDigest};

pub const AUTHENTICATOR_LEN: usize = 16;

fn md5(parts: &[&[u8]]) -> Result<[u8; AUTHENTICATOR_LEN]> {
    let total = parts.iter().map(|p| p.len()).sum();
    let mut seed: Vec<u8> = Vec::with_capacity(total);
    for part in parts {
        seed.extend_from_slice(part);
    }
    let digest = hash(MessageDigest::md5(), &seed)?;
    digest
        .as_ref()
        .try_into()
        .map_err(|_| PacketError::MalformedValue("md5 digest"))
}

/// Reverse the User-Password hiding (RFC 2865 §5.2). Trailing NUL padding is
/// stripped from the recovered plaintext.
pub fn decrypt_user_password(
    hidden: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; AUTHENTICATOR_LEN],
) -> Result<Vec<u8>> {
    if hidden.is_empty() || hidden.len() % 16 != 0 || hidden.len() > 128 {
        return Err(PacketError::MalformedValue("User-Password"));
    }
    let mut plain = Vec::with_capacity(hidden.len());
    let mut prev: &[u8] = request_authenticator;
    for chunk in hidden.chunks(16) {
        let pad = md5(&[secret, prev])?;
        plain.extend(chunk.iter().zip(pad.iter()).map(|(c, p)| c ^ p));
        prev = chunk;
    }
    while plain.last() == Some(&0) {
        plain.pop();
    }
    Ok(plain)
}

/// Hide a password the way a NAS does before sending an Access-Request.
pub fn encrypt_user_password(
    password: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; AUTHENTICATOR_LEN],
) -> Result<Vec<u8>> {
    if password.len() > 128 {
        return Err(PacketError::MalformedValue("User-Password"));
    }
    let padded_len = password.len().div_ceil(16).max(1) * 16;
    let mut padded = password.to_vec();
    padded.resize(padded_len, 0);

    let mut hidden: Vec<u8> = Vec::with_capacity(padded_len);
    let mut prev = request_authenticator.to_vec();
    for chunk in padded.chunks(16) {
        let pad = md5(&[secret, &prev])?;
        let block: Vec<u8> = chunk.iter().zip(pad.iter()).map(|(c, p)| c ^ p).collect();
        hidden.extend_from_slice(&block);
        prev = block;
    }
    Ok(hidden)
}

/// MD5(Code+Identifier+Length+RequestAuth+Attributes+Secret), used for every
/// reply and, with a zeroed authenticator, for Accounting-Request.
pub fn response_authenticator(
    header: &[u8],
    authenticator: &[u8; AUTHENTICATOR_LEN],
    attributes: &[u8],
    secret: &[u8],
) -> Result<[u8; AUTHENTICATOR_LEN]> {
    md5(&[header, authenticator, attributes, secret])
}

/// Accounting-Request authenticator check (RFC 2866 §3). `raw` is the full
/// request as received, trimmed to its declared length.
pub fn verify_accounting_request(raw: &[u8], secret: &[u8]) -> Result<bool> {
    if raw.len() < 20 {
        return Err(PacketError::TooShort(raw.len()));
    }
    let zeroed = [0u8; AUTHENTICATOR_LEN];
    let expected = response_authenticator(&raw[0..4], &zeroed, &raw[20..], secret)?;
    Ok(constant_time_eq(&expected, &raw[4..20]))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
