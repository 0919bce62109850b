// SPDX-License-Identifier: AGPL-3.0-only
//! Minimal NAS-side helpers: build requests and validate replies.

use crate::accounting::AcctStatusType;
use crate::attributes::{Attribute, ACCT_SESSION_ID, ACCT_STATUS_TYPE, USER_NAME, USER_PASSWORD};
use crate::crypto::{
    constant_time_eq, encrypt_user_password, response_authenticator, AUTHENTICATOR_LEN,
};
use crate::error::{PacketError, Result};
use crate::packet::{Code, Packet, HEADER_LEN};
use openssl::rand::rand_bytes;

pub fn new_request_authenticator() -> Result<[u8; AUTHENTICATOR_LEN]> {
    let mut auth = [0u8; AUTHENTICATOR_LEN];
    rand_bytes(&mut auth)?;
    Ok(auth)
}

/// Access-Request with User-Name and a hidden PAP User-Password.
pub fn access_request(
    identifier: u8,
    username: &str,
    password: &str,
    secret: &[u8],
) -> Result<Packet> {
    let authenticator = new_request_authenticator()?;
    let mut packet = Packet::new(Code::AccessRequest, identifier, authenticator);
    packet.add_attribute(Attribute::string(USER_NAME, username)?);
    let hidden = encrypt_user_password(password.as_bytes(), secret, &authenticator)?;
    packet.add_attribute(Attribute::new(USER_PASSWORD, hidden)?);
    Ok(packet)
}

/// Unsigned Accounting-Request; sign with [`Packet::encode_signed_request`].
pub fn accounting_request(
    identifier: u8,
    status: AcctStatusType,
    session_id: &str,
    username: &str,
) -> Result<Packet> {
    let mut packet = Packet::new(Code::AccountingRequest, identifier, [0u8; AUTHENTICATOR_LEN]);
    packet.add_attribute(Attribute::integer(ACCT_STATUS_TYPE, status.as_u32()));
    packet.add_attribute(Attribute::string(ACCT_SESSION_ID, session_id)?);
    packet.add_attribute(Attribute::string(USER_NAME, username)?);
    Ok(packet)
}

/// Check a reply's Response Authenticator against the request that caused it.
pub fn verify_reply(
    raw: &[u8],
    request_authenticator: &[u8; AUTHENTICATOR_LEN],
    secret: &[u8],
) -> Result<bool> {
    if raw.len() < HEADER_LEN {
        return Err(PacketError::TooShort(raw.len()));
    }
    let declared = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    let body = raw
        .get(HEADER_LEN..declared)
        .ok_or(PacketError::InvalidLength {
            declared,
            received: raw.len(),
        })?;
    let expected = response_authenticator(&raw[0..4], request_authenticator, body, secret)?;
    Ok(constant_time_eq(&expected, &raw[4..HEADER_LEN]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::decrypt_user_password;

    #[test]
    fn access_request_hides_password() {
        let packet = access_request(3, "ABC123", "pass1", b"shared1").unwrap();
        let hidden = &packet.attribute(USER_PASSWORD).unwrap().value;
        assert_eq!(hidden.len(), 16);
        let plain = decrypt_user_password(hidden, b"shared1", &packet.authenticator).unwrap();
        assert_eq!(plain, b"pass1");
    }

    #[test]
    fn reply_verification_detects_wrong_secret() {
        let request = access_request(4, "alice", "pw", b"shared1").unwrap();
        let reply = request.reply(Code::AccessReject);
        let raw = reply.encode_reply(&request.authenticator, b"shared1").unwrap();
        assert!(verify_reply(&raw, &request.authenticator, b"shared1").unwrap());
        assert!(!verify_reply(&raw, &request.authenticator, b"other").unwrap());
    }

    #[test]
    fn accounting_request_carries_status() {
        let packet = accounting_request(1, AcctStatusType::Stop, "sess-1", "alice").unwrap();
        assert_eq!(packet.u32_attribute(ACCT_STATUS_TYPE), Some(2));
        assert_eq!(packet.string_attribute(ACCT_SESSION_ID).as_deref(), Some("sess-1"));
    }
}
