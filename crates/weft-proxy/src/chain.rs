// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chain setup: source side and receiver side.
//!
//! The source resolves the first service, opens a chain-setup stream,
//! sends the spec, and waits for an ack. A receiver locates itself in
//! the spec; at the chain terminus it acks and hands its inbound stream
//! to an end-chain tunnel handler, otherwise it threads the request one
//! hop further, augments the returned debug trail with its own name,
//! acks upstream, and bridges both streams through a mid-chain handler.
//!
//! No hop forwards tunnel data before its ack has been sent; within one
//! stream, message order is preserved by the overlay.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use weft_overlay::{OverlayStream, ProtocolId, stream_handler};
use weft_protocol::{
    CHAIN_SETUP_PROTO, ChainMessage, ChainSpec, REV_CHAIN_PREFIX, TCP_TUNNEL_PROTO,
    Transport, UDP_TUNNEL_PROTO, read_message, write_message,
};

use crate::context::ProxyContext;
use crate::error::ProxyError;
use crate::resolve::resolve_service;
use crate::{tcp, udp};

/// How long the source waits for the chain to acknowledge.
const SETUP_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Source-side chain setup.
///
/// Returns the stream, ready for tunnel use, and the ack's debug trail.
pub async fn setup_chain(
    ctx: &Arc<ProxyContext>,
    spec: &ChainSpec,
) -> Result<(OverlayStream, String), ProxyError> {
    let first = spec.first_service();
    let (peer, _info) = resolve_service(ctx, first).await?;

    let mut stream = ctx
        .overlay
        .open_stream(peer, &ProtocolId::from(CHAIN_SETUP_PROTO))
        .await?;
    write_message(
        &mut stream,
        &ChainMessage::SetupRequest(spec.tokens().to_vec()),
    )
    .await?;

    let reply = tokio::time::timeout(SETUP_ACK_TIMEOUT, read_message(&mut stream))
        .await
        .map_err(|_| {
            stream.reset();
            ProxyError::SetupTimeout
        })??;

    match reply {
        ChainMessage::SetupAck(trail) => {
            if !trail.is_empty() {
                info!(chain = %spec, %trail, "chain established");
            }
            // The stream now carries tunnel traffic
            stream.set_protocol(tunnel_protocol(spec.first_transport()));
            Ok((stream, trail))
        }
        ChainMessage::Error(message) => {
            stream.reset();
            Err(ProxyError::ChainSetup(message))
        }
        other => {
            stream.reset();
            Err(ProxyError::Protocol(format!(
                "expected SetupAck, got {}",
                other.type_name()
            )))
        }
    }
}

/// Install the receiver-side chain-setup handler on the overlay.
pub fn register_chain_handler(ctx: Arc<ProxyContext>) {
    let handler_ctx = ctx.clone();
    ctx.overlay.set_handler(
        ProtocolId::from(CHAIN_SETUP_PROTO),
        stream_handler(move |stream| {
            let ctx = handler_ctx.clone();
            async move { handle_setup(ctx, stream).await }
        }),
    );
}

async fn handle_setup(ctx: Arc<ProxyContext>, mut inbound: OverlayStream) {
    let peer = inbound.peer();

    let request = match read_message(&mut inbound).await {
        Ok(message) => message,
        Err(e) => {
            warn!(%peer, error = %e, "failed to read chain setup request");
            inbound.reset();
            return;
        }
    };
    let tokens = match request {
        ChainMessage::SetupRequest(tokens) => tokens,
        other => {
            warn!(%peer, message = other.type_name(), "unexpected message type during setup");
            inbound.reset();
            return;
        }
    };

    let spec = match ChainSpec::parse(tokens) {
        Ok(spec) => spec,
        Err(e) => {
            warn!(%peer, error = %e, "rejecting malformed chain spec");
            send_error(&mut inbound, &e.to_string()).await;
            inbound.reset();
            return;
        }
    };

    let Some(local) = ctx.service.clone() else {
        warn!(%peer, chain = %spec, "chain setup reached a proxy with no sponsored service");
        send_error(&mut inbound, "this proxy does not sponsor a service").await;
        inbound.reset();
        return;
    };

    let Some(position) = spec.locate(&local.name) else {
        warn!(%peer, service = %local.name, chain = %spec, "service not found in chain spec");
        send_error(
            &mut inbound,
            &format!("service {} not found in chain spec", local.name),
        )
        .await;
        inbound.reset();
        return;
    };

    match position.next_service {
        None => {
            // This proxy is the chain terminus
            info!(chain = %spec, "end of chain reached, acking");
            let ack = ChainMessage::SetupAck(format!("{REV_CHAIN_PREFIX}{}", local.name));
            if let Err(e) = write_message(&mut inbound, &ack).await {
                warn!(%peer, error = %e, "failed to ack chain setup");
                inbound.reset();
                return;
            }
            inbound.set_protocol(tunnel_protocol(position.transport));
            match position.transport {
                Transport::Tcp => tcp::end_chain(&ctx, inbound, &local).await,
                Transport::Udp => udp::end_chain(&ctx, inbound, &local).await,
            }
        }
        Some(next) => {
            info!(chain = %spec, %next, "threading chain to next service");
            let (next_peer, _info) = match resolve_service(&ctx, &next).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(%next, error = %e, "unable to resolve next service");
                    send_error(&mut inbound, &format!("unable to resolve service {next}")).await;
                    inbound.reset();
                    return;
                }
            };
            let mut outbound = match ctx
                .overlay
                .open_stream(next_peer, &ProtocolId::from(CHAIN_SETUP_PROTO))
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%next, error = %e, "unable to dial next service");
                    send_error(&mut inbound, &format!("unable to dial service {next}")).await;
                    inbound.reset();
                    return;
                }
            };

            if let Err(e) = write_message(
                &mut outbound,
                &ChainMessage::SetupRequest(spec.tokens().to_vec()),
            )
            .await
            {
                warn!(%next, error = %e, "failed to forward chain setup request");
                outbound.reset();
                inbound.reset();
                return;
            }

            // Skip the inbound ack on downstream failure; the source
            // times out and cleans up its end
            let mut trail = match read_message(&mut outbound).await {
                Ok(ChainMessage::SetupAck(trail)) => trail,
                Ok(ChainMessage::Error(message)) => {
                    warn!(%next, %message, "downstream reported setup failure");
                    outbound.reset();
                    inbound.reset();
                    return;
                }
                Ok(other) => {
                    warn!(%next, message = other.type_name(), "unexpected message type during setup");
                    outbound.reset();
                    inbound.reset();
                    return;
                }
                Err(e) => {
                    warn!(%next, error = %e, "failed to read downstream ack");
                    outbound.reset();
                    inbound.reset();
                    return;
                }
            };

            if trail.starts_with(REV_CHAIN_PREFIX) {
                trail.push(' ');
                trail.push_str(&local.name);
            }
            if let Err(e) = write_message(&mut inbound, &ChainMessage::SetupAck(trail)).await {
                warn!(%peer, error = %e, "failed to ack chain setup");
                outbound.reset();
                inbound.reset();
                return;
            }

            let tunnel = tunnel_protocol(position.transport);
            inbound.set_protocol(tunnel.clone());
            outbound.set_protocol(tunnel);
            match position.transport {
                Transport::Tcp => tcp::mid_chain(&ctx, inbound, outbound, &local).await,
                Transport::Udp => udp::mid_chain(&ctx, inbound, outbound, &local).await,
            }
        }
    }
}

fn tunnel_protocol(transport: Transport) -> ProtocolId {
    match transport {
        Transport::Tcp => ProtocolId::from(TCP_TUNNEL_PROTO),
        Transport::Udp => ProtocolId::from(UDP_TUNNEL_PROTO),
    }
}

async fn send_error(stream: &mut OverlayStream, message: &str) {
    let error = ChainMessage::Error(message.to_string());
    if let Err(e) = write_message(stream, &error).await {
        warn!(error = %e, "failed to send error message");
    }
}
