// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS attribute TLVs and typed value helpers.

use crate::error::{PacketError, Result};
use std::net::Ipv4Addr;

pub const USER_NAME: u8 = 1;
pub const USER_PASSWORD: u8 = 2;
pub const NAS_IP_ADDRESS: u8 = 4;
pub const FRAMED_IP_ADDRESS: u8 = 8;
pub const REPLY_MESSAGE: u8 = 18;
pub const VENDOR_SPECIFIC: u8 = 26;
pub const SESSION_TIMEOUT: u8 = 27;
pub const CALLING_STATION_ID: u8 = 31;
pub const NAS_IDENTIFIER: u8 = 32;
pub const ACCT_STATUS_TYPE: u8 = 40;
pub const ACCT_DELAY_TIME: u8 = 41;
pub const ACCT_INPUT_OCTETS: u8 = 42;
pub const ACCT_OUTPUT_OCTETS: u8 = 43;
pub const ACCT_SESSION_ID: u8 = 44;
pub const ACCT_SESSION_TIME: u8 = 46;
pub const ACCT_TERMINATE_CAUSE: u8 = 49;
pub const ACCT_INPUT_GIGAWORDS: u8 = 52;
pub const ACCT_OUTPUT_GIGAWORDS: u8 = 53;
pub const MESSAGE_AUTHENTICATOR: u8 = 80;

/// Largest value an attribute can carry (255 minus the type/length octets).
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self> {
        if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
            return Err(PacketError::AttributeTooLong {
                attr_type,
                length: value.len(),
            });
        }
        Ok(Self { attr_type, value })
    }

    pub fn string(attr_type: u8, value: &str) -> Result<Self> {
        Self::new(attr_type, value.as_bytes().to_vec())
    }

    pub fn integer(attr_type: u8, value: u32) -> Self {
        Self {
            attr_type,
            value: value.to_be_bytes().to_vec(),
        }
    }

    pub fn ipv4(attr_type: u8, addr: Ipv4Addr) -> Self {
        Self {
            attr_type,
            value: addr.octets().to_vec(),
        }
    }

    /// Encoded size on the wire, including the type and length octets.
    pub fn wire_len(&self) -> usize {
        self.value.len() + 2
    }

    /// Lossy UTF-8 view; NAS vendors are not consistent about encodings.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    pub fn as_u32(&self) -> Result<u32> {
        let bytes: [u8; 4] = self
            .value
            .as_slice()
            .try_into()
            .map_err(|_| PacketError::MalformedValue("integer attribute"))?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn as_ipv4(&self) -> Result<Ipv4Addr> {
        let bytes: [u8; 4] = self
            .value
            .as_slice()
            .try_into()
            .map_err(|_| PacketError::MalformedValue("address attribute"))?;
        Ok(Ipv4Addr::from(bytes))
    }
}

/// Parse the attribute list that follows the 20-byte header.
pub fn parse_attributes(body: &[u8], base_offset: usize) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();
    let mut cursor = 0usize;
    while cursor < body.len() {
        let header = body
            .get(cursor..cursor + 2)
            .ok_or(PacketError::TruncatedAttribute {
                offset: base_offset + cursor,
            })?;
        let attr_type = header[0];
        let length = header[1] as usize;
        if length < 2 {
            return Err(PacketError::InvalidAttributeLength { attr_type, length });
        }
        let value = body
            .get(cursor + 2..cursor + length)
            .ok_or(PacketError::TruncatedAttribute {
                offset: base_offset + cursor,
            })?;
        attributes.push(Attribute {
            attr_type,
            value: value.to_vec(),
        });
        cursor += length;
    }
    Ok(attributes)
}
