// SPDX-License-Identifier: AGPL-3.0-only
//! Multi-tenant RADIUS AAA server for ISP subscribers and hotspot vouchers.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! drive the same pieces over loopback UDP.

pub mod accounting;
pub mod api;
pub mod auth;
pub mod config;
pub mod control;
pub mod http;
pub mod metrics;
pub mod model;
pub mod presence;
pub mod secrets;
pub mod server;
pub mod sessions;
pub mod store;
pub mod sweep;
pub mod voucher;
