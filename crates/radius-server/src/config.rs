// SPDX-License-Identifier: AGPL-3.0-only
use crate::secrets::DEFAULT_SHARED_SECRET;
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// JSON structured logging for log aggregation (ELK, Loki).
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "isp-radius", version, about = "Multi-tenant RADIUS AAA server")]
pub struct Args {
    /// Listen address for RADIUS authentication (Access-Request).
    #[arg(long, env = "RADIUS_LISTEN_AUTH", default_value = "0.0.0.0:1812")]
    pub listen_auth: SocketAddr,

    /// Listen address for RADIUS accounting (Accounting-Request).
    #[arg(long, env = "RADIUS_LISTEN_ACCT", default_value = "0.0.0.0:1813")]
    pub listen_acct: SocketAddr,

    /// Listen address for HTTP health checks and Prometheus metrics (e.g., 127.0.0.1:8080).
    #[arg(long, env = "RADIUS_LISTEN_HTTP")]
    pub listen_http: Option<SocketAddr>,

    /// Listen address for the management API. Requires --rbac-config.
    #[arg(long, env = "RADIUS_LISTEN_API")]
    pub listen_api: Option<SocketAddr>,

    /// JSON file mapping API caller CNs to roles and roles to permissions.
    #[arg(long, env = "RADIUS_RBAC_CONFIG")]
    pub rbac_config: Option<PathBuf>,

    /// PostgreSQL connection string. Without it an in-memory store seeded
    /// from --nas-secret is used.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Shared secret used when no NAS record matches the packet source.
    #[arg(
        long,
        env = "RADIUS_DEFAULT_SECRET",
        default_value = DEFAULT_SHARED_SECRET,
        hide_env_values = true
    )]
    pub default_secret: String,

    /// Do not borrow the secret of an arbitrary active NAS for unknown sources.
    #[arg(long, default_value_t = false)]
    pub disable_nas_fallback: bool,

    /// Interval in seconds between voucher expiry sweeps (0 = disabled).
    #[arg(long, env = "RADIUS_EXPIRY_SWEEP_SECS", default_value_t = 60)]
    pub expiry_sweep_secs: u64,

    /// Log output format: text or json.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Static NAS secrets (IP:SECRET) for the in-memory store (repeatable).
    #[arg(long, value_parser = parse_nas_secret, value_name = "IP:SECRET", num_args = 0..)]
    pub nas_secret: Vec<(IpAddr, String)>,
}

impl Args {
    /// Cross-field checks clap cannot express.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listen_api.is_some() && self.rbac_config.is_none() {
            return Err("--listen-api requires --rbac-config".into());
        }
        if self.default_secret.is_empty() {
            return Err("default secret cannot be empty".into());
        }
        if self.database_url.is_some() && !self.nas_secret.is_empty() {
            return Err(
                "--nas-secret only applies to the in-memory store; drop it or DATABASE_URL".into(),
            );
        }
        Ok(())
    }
}

fn parse_nas_secret(s: &str) -> std::result::Result<(IpAddr, String), String> {
    // IPv6 literals contain ':', so split on the last one.
    let (ip, secret) = s
        .rsplit_once(':')
        .ok_or_else(|| "expected IP:SECRET".to_string())?;
    let ip = ip
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map_err(|e| format!("invalid IP: {e}"))?;
    if secret.is_empty() {
        return Err("secret cannot be empty".into());
    }
    Ok((ip, secret.to_string()))
}
