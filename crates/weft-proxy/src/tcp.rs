// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP side of the L4 data plane.
//!
//! `open_tcp` binds one ingress listener per chain spec; accepted
//! connections each get their own chain and a pair of copy loops. The
//! mid- and end-chain handlers run on proxies inside the chain and
//! bridge tunnel streams through the local service.
//!
//! Teardown is cooperative: the loops of one flow are raced against
//! each other, so when any direction closes, dropping the rest resets
//! every stream and socket in the flow.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use weft_overlay::OverlayStream;
use weft_protocol::{ChainSpec, MAX_TCP_TUNNEL_PAYLOAD};

use crate::chain::setup_chain;
use crate::context::{LocalService, ProxyContext};
use crate::copy::{socket_to_stream, stream_to_socket, stream_to_stream};
use crate::error::ProxyError;

/// Open (or reuse) the TCP ingress listener for a chain.
///
/// Listeners are memoised by chain-spec key: repeated requests for the
/// same chain return the existing listener address.
pub async fn open_tcp(ctx: &Arc<ProxyContext>, spec: &ChainSpec) -> Result<SocketAddr, ProxyError> {
    let key = spec.key();
    let mut listeners = ctx.listeners.lock().await;
    if let Some(addr) = listeners.get(&key) {
        return Ok(*addr);
    }

    let listener = TcpListener::bind((ctx.ctrl_host, 0))
        .await
        .map_err(ProxyError::Listener)?;
    let addr = listener.local_addr().map_err(ProxyError::Listener)?;
    listeners.insert(key, addr);

    info!(chain = %spec, %addr, "opened TCP ingress listener");
    tokio::spawn(ingress(ctx.clone(), listener, spec.clone()));
    Ok(addr)
}

async fn ingress(ctx: Arc<ProxyContext>, listener: TcpListener, spec: ChainSpec) {
    loop {
        let (socket, client) = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(chain = %spec, error = %e, "accept failed");
                    continue;
                }
            },
        };
        debug!(chain = %spec, %client, "accepted TCP connection");
        // Chain setup happens per connection, off the accept path, so a
        // slow setup cannot head-of-line block other clients
        tokio::spawn(forward(ctx.clone(), socket, spec.clone()));
    }
    info!(chain = %spec, "shutting down TCP ingress");
}

async fn forward(ctx: Arc<ProxyContext>, socket: TcpStream, spec: ChainSpec) {
    let (stream, _trail) = match setup_chain(&ctx, &spec).await {
        Ok(established) => established,
        Err(e) => {
            warn!(chain = %spec, error = %e, "unable to set up chain");
            return;
        }
    };

    let (socket_read, socket_write) = socket.into_split();
    let (stream_read, stream_write) = stream.split();
    tokio::select! {
        _ = socket_to_stream(socket_read, stream_write, MAX_TCP_TUNNEL_PAYLOAD) => {}
        _ = stream_to_socket(stream_read, socket_write) => {}
    }
    debug!(chain = %spec, "TCP flow closed");
}

/// Chain-terminus handler: bridge the inbound tunnel with a TCP
/// connection to the local service.
pub async fn end_chain(_ctx: &Arc<ProxyContext>, inbound: OverlayStream, local: &LocalService) {
    let service = match TcpStream::connect(&local.endpoint).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(endpoint = %local.endpoint, error = %e, "unable to dial local service");
            inbound.reset();
            return;
        }
    };

    let (service_read, service_write) = service.into_split();
    let (inbound_read, inbound_write) = inbound.split();
    tokio::select! {
        _ = stream_to_socket(inbound_read, service_write) => {}
        _ = socket_to_stream(service_read, inbound_write, MAX_TCP_TUNNEL_PAYLOAD) => {}
    }
    debug!(endpoint = %local.endpoint, "TCP end-chain flow closed");
}

/// Mid-chain handler: thread the local service into the chain.
///
/// Inbound tunnel data feeds the local service; the service's output
/// continues down the chain; the downstream reverse path flows straight
/// back to the inbound side. Closure of any leg collapses all three.
pub async fn mid_chain(
    _ctx: &Arc<ProxyContext>,
    inbound: OverlayStream,
    outbound: OverlayStream,
    local: &LocalService,
) {
    let service = match TcpStream::connect(&local.endpoint).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(endpoint = %local.endpoint, error = %e, "unable to dial local service");
            inbound.reset();
            outbound.reset();
            return;
        }
    };

    let (service_read, service_write) = service.into_split();
    let (inbound_read, inbound_write) = inbound.split();
    let (outbound_read, outbound_write) = outbound.split();
    tokio::select! {
        _ = stream_to_socket(inbound_read, service_write) => {}
        _ = socket_to_stream(service_read, outbound_write, MAX_TCP_TUNNEL_PAYLOAD) => {}
        _ = stream_to_stream(outbound_read, inbound_write) => {}
    }
    debug!(endpoint = %local.endpoint, "TCP mid-chain flow closed");
}
