// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! UDP side of the L4 data plane.
//!
//! One ingress socket serves every client of a chain, so datagrams are
//! demultiplexed by source address: each new client gets its own chain
//! and overlay stream, recorded in a per-listener flow map, plus a
//! reverse-path worker that addresses replies back to that client. As
//! long as a client's map entry exists, its datagrams and replies
//! always traverse the same overlay stream.
//!
//! Flow-map cleanup rides the overlay's stream-closed events, filtered
//! to the UDP tunnel protocol id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use weft_overlay::{OverlayStream, StreamId, StreamWriter};
use weft_protocol::{ChainMessage, ChainSpec, MAX_UDP_TUNNEL_PAYLOAD, UDP_TUNNEL_PROTO, write_message};

use crate::chain::setup_chain;
use crate::context::{LocalService, ProxyContext};
use crate::copy::{stream_to_stream, stream_to_udp, stream_to_udp_addr, udp_to_stream};
use crate::error::ProxyError;

/// One client's outbound tunnel.
#[derive(Clone)]
struct Flow {
    stream: StreamId,
    writer: Arc<Mutex<StreamWriter>>,
}

type FlowMap = Arc<Mutex<HashMap<SocketAddr, Flow>>>;

/// Open (or reuse) the UDP ingress socket for a chain.
///
/// Memoised by chain-spec key, like the TCP ingress.
pub async fn open_udp(ctx: &Arc<ProxyContext>, spec: &ChainSpec) -> Result<SocketAddr, ProxyError> {
    let key = spec.key();
    let mut listeners = ctx.listeners.lock().await;
    if let Some(addr) = listeners.get(&key) {
        return Ok(*addr);
    }

    let socket = UdpSocket::bind((ctx.ctrl_host, 0))
        .await
        .map_err(ProxyError::Listener)?;
    let addr = socket.local_addr().map_err(ProxyError::Listener)?;
    listeners.insert(key, addr);

    info!(chain = %spec, %addr, "opened UDP ingress socket");
    tokio::spawn(ingress(ctx.clone(), socket, spec.clone()));
    Ok(addr)
}

async fn ingress(ctx: Arc<ProxyContext>, socket: UdpSocket, spec: ChainSpec) {
    let socket = Arc::new(socket);
    let flows: FlowMap = Arc::new(Mutex::new(HashMap::new()));

    spawn_cleanup(&ctx, flows.clone());

    let mut buf = vec![0u8; MAX_UDP_TUNNEL_PAYLOAD];
    loop {
        let (n, client) = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(chain = %spec, error = %e, "UDP ingress read failed");
                    break;
                }
            },
        };

        let flow = {
            let mut map = flows.lock().await;
            match map.get(&client) {
                Some(flow) => flow.clone(),
                None => {
                    debug!(chain = %spec, %client, "new UDP client");
                    match new_flow(&ctx, &spec, &socket, client).await {
                        Some(flow) => {
                            map.insert(client, flow.clone());
                            flow
                        }
                        None => continue,
                    }
                }
            }
        };

        send_with_retry(&ctx, &spec, &socket, &flows, client, flow, &buf[..n]).await;
    }
    info!(chain = %spec, "shutting down UDP ingress");
}

/// Remove flow-map entries whose overlay stream has closed.
fn spawn_cleanup(ctx: &Arc<ProxyContext>, flows: FlowMap) {
    let mut events = ctx.overlay.events();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "stream event channel lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            };
            if event.protocol.as_str() != UDP_TUNNEL_PROTO {
                continue;
            }
            let mut map = flows.lock().await;
            let before = map.len();
            map.retain(|_, flow| flow.stream != event.stream);
            if map.len() < before {
                debug!(stream = %event.stream, "cleaned up closed UDP flow");
            }
        }
    });
}

/// Set up a fresh chain for one client and start its reverse-path
/// worker.
async fn new_flow(
    ctx: &Arc<ProxyContext>,
    spec: &ChainSpec,
    socket: &Arc<UdpSocket>,
    client: SocketAddr,
) -> Option<Flow> {
    let (stream, _trail) = match setup_chain(ctx, spec).await {
        Ok(established) => established,
        Err(e) => {
            warn!(chain = %spec, %client, error = %e, "unable to set up chain");
            return None;
        }
    };
    let (reader, writer) = stream.split();
    let flow = Flow {
        stream: writer.id(),
        writer: Arc::new(Mutex::new(writer)),
    };

    let socket = socket.clone();
    tokio::spawn(async move {
        let mut reader = reader;
        stream_to_udp_addr(&mut reader, socket, client).await;
        // Emit the close event now so the flow-map entry is cleaned up
        reader.reset();
    });
    Some(flow)
}

/// Forward one datagram, retrying exactly once on a fresh chain.
///
/// A write can fail when the old stream closed but its cleanup event
/// has not landed yet, or when the remote peer restarted; one retry on
/// a new chain covers both. A second failure drops the mapping and the
/// datagram.
async fn send_with_retry(
    ctx: &Arc<ProxyContext>,
    spec: &ChainSpec,
    socket: &Arc<UdpSocket>,
    flows: &FlowMap,
    client: SocketAddr,
    flow: Flow,
    datagram: &[u8],
) {
    let message = ChainMessage::Data(bytes::Bytes::copy_from_slice(datagram));

    {
        let mut writer = flow.writer.lock().await;
        if write_message(&mut *writer, &message).await.is_ok() {
            return;
        }
        writer.reset();
    }
    debug!(chain = %spec, %client, "tunnel write failed, retrying on a fresh chain");

    let replacement = {
        let mut map = flows.lock().await;
        map.remove(&client);
        match new_flow(ctx, spec, socket, client).await {
            Some(flow) => {
                map.insert(client, flow.clone());
                flow
            }
            None => return,
        }
    };

    let mut writer = replacement.writer.lock().await;
    if write_message(&mut *writer, &message).await.is_err() {
        warn!(chain = %spec, %client, "retry failed, dropping datagram");
        writer.reset();
        drop(writer);
        flows.lock().await.remove(&client);
    }
}

/// Chain-terminus handler: bridge the inbound tunnel with a UDP socket
/// to the local service.
pub async fn end_chain(_ctx: &Arc<ProxyContext>, inbound: OverlayStream, local: &LocalService) {
    info!(endpoint = %local.endpoint, "UDP end-chain handler started");
    let socket = match connect_local(&local.endpoint).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(endpoint = %local.endpoint, error = %e, "unable to dial local service");
            inbound.reset();
            return;
        }
    };

    let (inbound_read, inbound_write) = inbound.split();
    tokio::select! {
        _ = stream_to_udp(inbound_read, socket.clone()) => {}
        _ = udp_to_stream(socket, inbound_write, MAX_UDP_TUNNEL_PAYLOAD) => {}
    }
    debug!(endpoint = %local.endpoint, "UDP end-chain flow closed");
}

/// Mid-chain handler: thread the local service into the chain over UDP.
pub async fn mid_chain(
    _ctx: &Arc<ProxyContext>,
    inbound: OverlayStream,
    outbound: OverlayStream,
    local: &LocalService,
) {
    info!(endpoint = %local.endpoint, "UDP mid-chain handler started");
    let socket = match connect_local(&local.endpoint).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(endpoint = %local.endpoint, error = %e, "unable to dial local service");
            inbound.reset();
            outbound.reset();
            return;
        }
    };

    let (inbound_read, inbound_write) = inbound.split();
    let (outbound_read, outbound_write) = outbound.split();
    tokio::select! {
        _ = stream_to_udp(inbound_read, socket.clone()) => {}
        _ = udp_to_stream(socket, outbound_write, MAX_UDP_TUNNEL_PAYLOAD) => {}
        _ = stream_to_stream(outbound_read, inbound_write) => {}
    }
    debug!(endpoint = %local.endpoint, "UDP mid-chain flow closed");
}

async fn connect_local(endpoint: &str) -> std::io::Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(endpoint).await?;
    Ok(Arc::new(socket))
}
