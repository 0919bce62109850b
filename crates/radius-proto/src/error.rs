// SPDX-License-Identifier: AGPL-3.0-only
//! Errors raised while decoding or encoding RADIUS packets.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet too short: {0} bytes (minimum 20)")]
    TooShort(usize),

    #[error("declared length {declared} invalid for {received} received bytes")]
    InvalidLength { declared: usize, received: usize },

    #[error("unknown RADIUS code {0}")]
    UnknownCode(u8),

    #[error("attribute at offset {offset} truncated")]
    TruncatedAttribute { offset: usize },

    #[error("attribute {attr_type} has invalid length {length}")]
    InvalidAttributeLength { attr_type: u8, length: usize },

    #[error("attribute {attr_type} value too long ({length} bytes, maximum 253)")]
    AttributeTooLong { attr_type: u8, length: usize },

    #[error("packet would exceed maximum length ({0} bytes)")]
    PacketTooLong(usize),

    #[error("{0}: malformed value")]
    MalformedValue(&'static str),

    #[error("vendor-specific attribute malformed: {0}")]
    InvalidVendorSpecific(&'static str),

    #[error("digest failure: {0}")]
    Digest(#[from] openssl::error::ErrorStack),
}

pub type Result<T, E = PacketError> = std::result::Result<T, E>;
