// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS packet framing: the 20-byte header plus attribute list.

use crate::attributes::{parse_attributes, Attribute};
use crate::crypto::{response_authenticator, AUTHENTICATOR_LEN};
use crate::error::{PacketError, Result};
use bytes::{BufMut, BytesMut};
use log::debug;

pub const HEADER_LEN: usize = 20;
pub const MAX_PACKET_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    AccessRequest = 1,
    AccessAccept = 2,
    AccessReject = 3,
    AccountingRequest = 4,
    AccountingResponse = 5,
    DisconnectRequest = 40,
    DisconnectAck = 41,
    DisconnectNak = 42,
}

impl Code {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Code::AccessRequest),
            2 => Some(Code::AccessAccept),
            3 => Some(Code::AccessReject),
            4 => Some(Code::AccountingRequest),
            5 => Some(Code::AccountingResponse),
            40 => Some(Code::DisconnectRequest),
            41 => Some(Code::DisconnectAck),
            42 => Some(Code::DisconnectNak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub code: Code,
    pub identifier: u8,
    pub authenticator: [u8; AUTHENTICATOR_LEN],
    pub attributes: Vec<Attribute>,
}

impl Packet {
    pub fn new(code: Code, identifier: u8, authenticator: [u8; AUTHENTICATOR_LEN]) -> Self {
        Self {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    /// Decode a datagram. Octets past the declared length are padding and
    /// ignored (RFC 2865 §3); a declared length longer than the datagram is an
    /// error.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(PacketError::TooShort(data.len()));
        }
        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&declared) || declared > data.len() {
            return Err(PacketError::InvalidLength {
                declared,
                received: data.len(),
            });
        }
        if declared < data.len() {
            debug!("ignoring {} octets of padding after RADIUS packet", data.len() - declared);
        }
        let code = Code::from_u8(data[0]).ok_or(PacketError::UnknownCode(data[0]))?;
        let mut authenticator = [0u8; AUTHENTICATOR_LEN];
        authenticator.copy_from_slice(&data[4..HEADER_LEN]);
        let attributes = parse_attributes(&data[HEADER_LEN..declared], HEADER_LEN)?;
        Ok(Self {
            code,
            identifier: data[1],
            authenticator,
            attributes,
        })
    }

    /// Encode as-is, with the authenticator field copied verbatim.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let attrs = self.encode_attributes()?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + attrs.len());
        buf.put_slice(&self.header_bytes(attrs.len())?);
        buf.put_slice(&self.authenticator);
        buf.put_slice(&attrs);
        Ok(buf.to_vec())
    }

    /// Encode a reply whose authenticator is computed from the request
    /// authenticator and the shared secret.
    pub fn encode_reply(
        &self,
        request_authenticator: &[u8; AUTHENTICATOR_LEN],
        secret: &[u8],
    ) -> Result<Vec<u8>> {
        let attrs = self.encode_attributes()?;
        let header = self.header_bytes(attrs.len())?;
        let auth = response_authenticator(&header, request_authenticator, &attrs, secret)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + attrs.len());
        buf.put_slice(&header);
        buf.put_slice(&auth);
        buf.put_slice(&attrs);
        Ok(buf.to_vec())
    }

    /// Encode a request whose authenticator is MD5 over the packet with a
    /// zeroed authenticator field (Accounting-Request, Disconnect-Request).
    pub fn encode_signed_request(&mut self, secret: &[u8]) -> Result<Vec<u8>> {
        let attrs = self.encode_attributes()?;
        let header = self.header_bytes(attrs.len())?;
        let zeroed = [0u8; AUTHENTICATOR_LEN];
        self.authenticator = response_authenticator(&header, &zeroed, &attrs, secret)?;
        self.encode()
    }

    /// Empty reply carrying the request identifier; attributes are added by
    /// the caller.
    pub fn reply(&self, code: Code) -> Packet {
        Packet::new(code, self.identifier, [0u8; AUTHENTICATOR_LEN])
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub fn attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    pub fn attributes_of(&self, attr_type: u8) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(move |a| a.attr_type == attr_type)
    }

    pub fn string_attribute(&self, attr_type: u8) -> Option<String> {
        self.attribute(attr_type).map(Attribute::as_string)
    }

    pub fn u32_attribute(&self, attr_type: u8) -> Option<u32> {
        self.attribute(attr_type).and_then(|a| a.as_u32().ok())
    }

    fn encode_attributes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        for attr in &self.attributes {
            if attr.value.len() > crate::attributes::MAX_ATTRIBUTE_VALUE_LEN {
                return Err(PacketError::AttributeTooLong {
                    attr_type: attr.attr_type,
                    length: attr.value.len(),
                });
            }
            buf.put_u8(attr.attr_type);
            buf.put_u8(attr.wire_len() as u8);
            buf.put_slice(&attr.value);
        }
        Ok(buf.to_vec())
    }

    fn header_bytes(&self, attrs_len: usize) -> Result<[u8; 4]> {
        let length = HEADER_LEN + attrs_len;
        if length > MAX_PACKET_LEN {
            return Err(PacketError::PacketTooLong(length));
        }
        let len = (length as u16).to_be_bytes();
        Ok([self.code as u8, self.identifier, len[0], len[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{NAS_IP_ADDRESS, USER_NAME, USER_PASSWORD};
    use crate::crypto::decrypt_user_password;

    // RFC 2865 §7.1 Access-Request / Access-Accept exchange.
    const RFC_REQUEST: &str = concat!(
        "010000380f403f9473978057bd83d5cb98f4227a",
        "01066e656d6f02120dbe708d93d413ce3196e43f",
        "782a0aee0406c0a80110050600000003",
    );
    const RFC_ACCEPT: &str = concat!(
        "0200002686fe220e7624ba2a1005f6bf9b55e0b2",
        "0606000000010f06000000000e06c0a80103",
    );

    #[test]
    fn decode_rfc_access_request() {
        let raw = hex::decode(RFC_REQUEST).unwrap();
        let packet = Packet::decode(&raw).unwrap();
        assert_eq!(packet.code, Code::AccessRequest);
        assert_eq!(packet.identifier, 0);
        assert_eq!(packet.string_attribute(USER_NAME).as_deref(), Some("nemo"));
        assert_eq!(
            packet.attribute(NAS_IP_ADDRESS).unwrap().as_ipv4().unwrap(),
            std::net::Ipv4Addr::new(192, 168, 1, 16)
        );
        let hidden = &packet.attribute(USER_PASSWORD).unwrap().value;
        let plain = decrypt_user_password(hidden, b"xyzzy5461", &packet.authenticator).unwrap();
        assert_eq!(plain, b"arctangent");
    }

    #[test]
    fn reply_authenticator_matches_rfc_accept() {
        let request = Packet::decode(&hex::decode(RFC_REQUEST).unwrap()).unwrap();
        let mut accept = request.reply(Code::AccessAccept);
        accept.add_attribute(Attribute::integer(6, 1));
        accept.add_attribute(Attribute::integer(15, 0));
        accept.add_attribute(Attribute::ipv4(14, std::net::Ipv4Addr::new(192, 168, 1, 3)));
        let bytes = accept.encode_reply(&request.authenticator, b"xyzzy5461").unwrap();
        assert_eq!(hex::encode(bytes), RFC_ACCEPT);
    }

    #[test]
    fn decode_ignores_trailing_padding() {
        let mut raw = hex::decode(RFC_REQUEST).unwrap();
        raw.extend_from_slice(&[0u8; 8]);
        let packet = Packet::decode(&raw).unwrap();
        assert_eq!(packet.attributes.len(), 4);
    }

    #[test]
    fn decode_rejects_short_datagram() {
        let raw = hex::decode(RFC_REQUEST).unwrap();
        assert!(matches!(
            Packet::decode(&raw[..30]),
            Err(PacketError::InvalidLength { declared: 56, received: 30 })
        ));
        assert!(matches!(Packet::decode(&raw[..10]), Err(PacketError::TooShort(10))));
    }

    #[test]
    fn decode_rejects_unknown_code() {
        let mut raw = hex::decode(RFC_REQUEST).unwrap();
        raw[0] = 99;
        assert!(matches!(Packet::decode(&raw), Err(PacketError::UnknownCode(99))));
    }

    #[test]
    fn signed_request_verifies() {
        let mut packet = Packet::new(Code::AccountingRequest, 9, [0u8; 16]);
        packet.add_attribute(Attribute::integer(crate::attributes::ACCT_STATUS_TYPE, 1));
        let bytes = packet.encode_signed_request(b"shared1").unwrap();
        assert!(crate::crypto::verify_accounting_request(&bytes, b"shared1").unwrap());
        assert!(!crate::crypto::verify_accounting_request(&bytes, b"shared2").unwrap());
    }

    #[test]
    fn encode_refuses_oversized_packet() {
        let mut packet = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        for _ in 0..20 {
            packet.attributes.push(Attribute {
                attr_type: 18,
                value: vec![b'x'; 253],
            });
        }
        assert!(matches!(packet.encode(), Err(PacketError::PacketTooLong(_))));
    }
}
