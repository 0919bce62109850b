// SPDX-License-Identifier: AGPL-3.0-only
//! UDP listeners for authentication (1812) and accounting (1813).
//!
//! Each datagram is handled on its own task. The secret resolved from the
//! source address verifies the request and signs the reply.

use crate::accounting::{AcctHandler, AcctRequest};
use crate::auth::{AuthHandler, AuthOutcome, AuthRequest, CredentialKind};
use crate::metrics::{metrics, AuthTimer};
use crate::secrets::SecretResolver;
use anyhow::{Context, Result};
use isp_radius_proto::{verify_accounting_request, Code, Packet, MAX_PACKET_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

const AUTH_LISTENER: &str = "auth";
const ACCT_LISTENER: &str = "acct";

/// Everything a datagram handler needs, shared by both listeners.
pub struct RadiusContext {
    pub resolver: SecretResolver,
    pub auth: AuthHandler,
    pub acct: AcctHandler,
}

pub async fn bind(addr: SocketAddr, name: &str) -> Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("binding {name} listener {addr}"))?;
    info!("listening for RADIUS {} on {}", name, socket.local_addr()?);
    Ok(Arc::new(socket))
}

pub async fn serve_auth(socket: Arc<UdpSocket>, ctx: Arc<RadiusContext>) -> Result<()> {
    serve(socket, ctx, AUTH_LISTENER).await
}

pub async fn serve_acct(socket: Arc<UdpSocket>, ctx: Arc<RadiusContext>) -> Result<()> {
    serve(socket, ctx, ACCT_LISTENER).await
}

async fn serve(
    socket: Arc<UdpSocket>,
    ctx: Arc<RadiusContext>,
    listener: &'static str,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_PACKET_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                // ICMP unreachable from an earlier reply surfaces here on some
                // platforms; the socket itself is still usable.
                warn!(error = %err, listener, "receive failed");
                continue;
            }
        };
        let datagram = buf[..len].to_vec();
        let socket = socket.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let reply = match listener {
                AUTH_LISTENER => handle_auth_datagram(&ctx, &datagram, peer).await,
                _ => handle_acct_datagram(&ctx, &datagram, peer).await,
            };
            if let Some(reply) = reply {
                if let Err(err) = socket.send_to(&reply, peer).await {
                    warn!(error = %err, peer = %peer, listener, "failed to send reply");
                }
            }
        });
    }
}

fn dropped(listener: &str, reason: &str) {
    metrics()
        .packets_dropped_total
        .with_label_values(&[listener, reason])
        .inc();
}

/// Process one Access-Request datagram. `None` means drop silently.
pub async fn handle_auth_datagram(
    ctx: &RadiusContext,
    datagram: &[u8],
    peer: SocketAddr,
) -> Option<Vec<u8>> {
    metrics().packets_received_total.with_label_values(&[AUTH_LISTENER]).inc();
    let packet = match Packet::decode(datagram) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(error = %err, peer = %peer, "dropping malformed access request");
            dropped(AUTH_LISTENER, "malformed");
            return None;
        }
    };
    if packet.code != Code::AccessRequest {
        warn!(peer = %peer, code = ?packet.code, "unexpected packet on auth port");
        dropped(AUTH_LISTENER, "unexpected_code");
        return None;
    }

    let resolved = ctx.resolver.resolve(peer.ip()).await;
    let timer = AuthTimer::new();
    let outcome = match AuthRequest::from_packet(&packet, &resolved.secret) {
        Ok(request) => ctx.auth.handle(&request, resolved.tenant_id).await,
        Err(reason) => {
            warn!(peer = %peer, reason = %reason, "access request missing credentials");
            AuthOutcome::Reject {
                kind: CredentialKind::Unknown,
                reason,
            }
        }
    };

    let kind = outcome.kind();
    let reply = match outcome {
        AuthOutcome::Accept { attributes, .. } => {
            timer.finish(kind.as_str(), "accept");
            let mut reply = packet.reply(Code::AccessAccept);
            for attribute in attributes {
                reply.add_attribute(attribute);
            }
            reply
        }
        AuthOutcome::Reject { reason, .. } => {
            timer.finish(kind.as_str(), "reject");
            metrics().auth_rejects_total.with_label_values(&[reason.label()]).inc();
            packet.reply(Code::AccessReject)
        }
    };

    match reply.encode_reply(&packet.authenticator, &resolved.secret) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            error!(error = %err, peer = %peer, "failed to encode access reply");
            None
        }
    }
}

/// Process one Accounting-Request datagram. Anything that verifies is
/// acknowledged, whatever happens to the record.
pub async fn handle_acct_datagram(
    ctx: &RadiusContext,
    datagram: &[u8],
    peer: SocketAddr,
) -> Option<Vec<u8>> {
    metrics().packets_received_total.with_label_values(&[ACCT_LISTENER]).inc();
    let packet = match Packet::decode(datagram) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(error = %err, peer = %peer, "dropping malformed accounting request");
            dropped(ACCT_LISTENER, "malformed");
            return None;
        }
    };
    if packet.code != Code::AccountingRequest {
        warn!(peer = %peer, code = ?packet.code, "unexpected packet on accounting port");
        dropped(ACCT_LISTENER, "unexpected_code");
        return None;
    }

    let resolved = ctx.resolver.resolve(peer.ip()).await;
    let declared = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    match verify_accounting_request(&datagram[..declared], &resolved.secret) {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                peer = %peer,
                source = %resolved.source,
                "accounting request authenticator mismatch"
            );
            dropped(ACCT_LISTENER, "bad_authenticator");
            return None;
        }
        Err(err) => {
            warn!(error = %err, peer = %peer, "accounting request could not be verified");
            dropped(ACCT_LISTENER, "malformed");
            return None;
        }
    }

    match AcctRequest::from_packet(&packet, peer.ip()) {
        Ok(request) => ctx.acct.handle(&request, resolved.tenant_id).await,
        Err(err) => warn!(error = %err, peer = %peer, "acknowledging unusable accounting request"),
    }

    match packet
        .reply(Code::AccountingResponse)
        .encode_reply(&packet.authenticator, &resolved.secret)
    {
        Ok(bytes) => {
            debug!(peer = %peer, id = packet.identifier, "accounting response");
            Some(bytes)
        }
        Err(err) => {
            error!(error = %err, peer = %peer, "failed to encode accounting response");
            None
        }
    }
}
