// SPDX-License-Identifier: AGPL-3.0-only
//! Vendor-Specific attribute (type 26) payloads.
//!
//! Payload layout: 4-byte big-endian vendor id, 1 sub-type byte, 1 length byte
//! (value length + 2), then the raw value.

use crate::attributes::{Attribute, VENDOR_SPECIFIC};
use crate::error::{PacketError, Result};
use bytes::{BufMut, BytesMut};

pub const MIKROTIK_VENDOR_ID: u32 = 14988;
pub const MIKROTIK_RATE_LIMIT: u8 = 8;
pub const MIKROTIK_GROUP: u8 = 26;

/// Largest sub-attribute value that still fits in one attribute 26.
pub const MAX_VENDOR_VALUE_LEN: usize = 253 - 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAttribute {
    pub vendor_id: u32,
    pub sub_type: u8,
    pub value: Vec<u8>,
}

pub fn encode_vendor_specific(vendor_id: u32, sub_type: u8, value: &[u8]) -> Result<Vec<u8>> {
    if value.len() > MAX_VENDOR_VALUE_LEN {
        return Err(PacketError::InvalidVendorSpecific("value too long"));
    }
    let mut buf = BytesMut::with_capacity(6 + value.len());
    buf.put_u32(vendor_id);
    buf.put_u8(sub_type);
    buf.put_u8((value.len() + 2) as u8);
    buf.put_slice(value);
    Ok(buf.to_vec())
}

pub fn decode_vendor_specific(payload: &[u8]) -> Result<VendorAttribute> {
    if payload.len() < 6 {
        return Err(PacketError::InvalidVendorSpecific("payload shorter than 6 bytes"));
    }
    let vendor_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let sub_type = payload[4];
    let length = payload[5] as usize;
    if length < 2 || 4 + length != payload.len() {
        return Err(PacketError::InvalidVendorSpecific("sub-attribute length mismatch"));
    }
    Ok(VendorAttribute {
        vendor_id,
        sub_type,
        value: payload[6..].to_vec(),
    })
}

/// Wrap a vendor payload in a type-26 attribute.
pub fn vendor_attribute(vendor_id: u32, sub_type: u8, value: &[u8]) -> Result<Attribute> {
    Attribute::new(VENDOR_SPECIFIC, encode_vendor_specific(vendor_id, sub_type, value)?)
}

pub fn mikrotik_rate_limit(rate: &str) -> Result<Attribute> {
    vendor_attribute(MIKROTIK_VENDOR_ID, MIKROTIK_RATE_LIMIT, rate.as_bytes())
}

pub fn mikrotik_group(group: &str) -> Result<Attribute> {
    vendor_attribute(MIKROTIK_VENDOR_ID, MIKROTIK_GROUP, group.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_layout() {
        let payload =
            encode_vendor_specific(MIKROTIK_VENDOR_ID, MIKROTIK_RATE_LIMIT, b"512k/1024k").unwrap();
        assert_eq!(&payload[0..4], &[0x00, 0x00, 0x3a, 0x8c]);
        assert_eq!(payload[4], 8);
        assert_eq!(payload[5], 12);
        assert_eq!(&payload[6..], b"512k/1024k");

        let decoded = decode_vendor_specific(&payload).unwrap();
        assert_eq!(decoded.vendor_id, 14988);
        assert_eq!(decoded.sub_type, 8);
        assert_eq!(decoded.value, b"512k/1024k");
    }

    #[test]
    fn empty_value_encodes_length_two() {
        let payload = encode_vendor_specific(MIKROTIK_VENDOR_ID, MIKROTIK_GROUP, b"").unwrap();
        assert_eq!(payload.len(), 6);
        assert_eq!(payload[5], 2);
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut payload =
            encode_vendor_specific(MIKROTIK_VENDOR_ID, MIKROTIK_GROUP, b"gold").unwrap();
        payload[5] = 9;
        assert!(decode_vendor_specific(&payload).is_err());
        assert!(decode_vendor_specific(&[0, 0, 0x3a]).is_err());
    }

    #[test]
    fn wrapped_in_attribute_26() {
        let attr = mikrotik_group("Gold-10M").unwrap();
        assert_eq!(attr.attr_type, VENDOR_SPECIFIC);
        assert_eq!(decode_vendor_specific(&attr.value).unwrap().value, b"Gold-10M");
    }

    #[test]
    fn oversized_value_rejected() {
        let encode = |len: usize| {
            encode_vendor_specific(MIKROTIK_VENDOR_ID, MIKROTIK_RATE_LIMIT, &vec![b'x'; len])
        };
        assert!(encode(248).is_err());
        assert!(encode(247).is_ok());
    }
}
