// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS protocol helpers: packet framing, attributes, shared-secret MD5
//! constructions and vendor-specific attributes.
//! Datagram-oriented; the server owns the sockets.

pub mod accounting;
pub mod attributes;
pub mod client;
pub mod crypto;
mod error;
pub mod packet;
pub mod vendor;

pub use accounting::{
    octets_with_gigawords, terminate_cause_name, AcctStatusType, CAUSE_ADMIN_DISCONNECT,
};
pub use attributes::Attribute;
pub use crypto::{
    decrypt_user_password, encrypt_user_password, verify_accounting_request, AUTHENTICATOR_LEN,
};
pub use error::{PacketError, Result};
pub use packet::{Code, Packet, HEADER_LEN, MAX_PACKET_LEN};
pub use vendor::{
    decode_vendor_specific, encode_vendor_specific, mikrotik_group, mikrotik_rate_limit,
    VendorAttribute, MIKROTIK_GROUP, MIKROTIK_RATE_LIMIT, MIKROTIK_VENDOR_ID,
};

pub const DEFAULT_AUTH_PORT: u16 = 1812;
pub const DEFAULT_ACCT_PORT: u16 = 1813;
pub const DEFAULT_COA_PORT: u16 = 3799;
