// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tunnel teardown behaviour.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use weft_overlay::Overlay;
use weft_protocol::TCP_TUNNEL_PROTO;
use weft_proxy::http;

use common::{TestNet, tcp_echo_server};

#[tokio::test]
async fn test_client_hangup_closes_tunnel_stream() {
    let net = TestNet::new(&["echo"]);
    let echo = tcp_echo_server().await;
    net.sponsor("echo", echo).await;

    let (client_ctx, client_overlay) = net.client();
    let (ctrl, _server) = http::serve(client_ctx.clone(), 0).await.unwrap();
    let body = reqwest::get(format!("http://{ctrl}/tcp/echo"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let listener: SocketAddr = body.trim().parse().unwrap();

    let mut events = client_overlay.events();

    // Exercise the tunnel, then hang up
    let mut socket = TcpStream::connect(listener).await.unwrap();
    socket.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    socket.read_exact(&mut buf).await.unwrap();
    drop(socket);

    // The source's overlay stream closes carrying the tunnel protocol
    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.protocol.as_str() == TCP_TUNNEL_PROTO {
                return event;
            }
        }
    })
    .await
    .expect("tunnel stream did not close");
    assert_eq!(event.protocol.as_str(), TCP_TUNNEL_PROTO);
}

#[tokio::test]
async fn test_shutdown_stops_ingress() {
    let net = TestNet::new(&["echo"]);
    let echo = tcp_echo_server().await;
    net.sponsor("echo", echo).await;

    let (client_ctx, _) = net.client();
    let (ctrl, _server) = http::serve(client_ctx.clone(), 0).await.unwrap();
    let body = reqwest::get(format!("http://{ctrl}/tcp/echo"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let listener: SocketAddr = body.trim().parse().unwrap();

    // Tunnel works while the proxy is up
    let mut socket = TcpStream::connect(listener).await.unwrap();
    socket.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    socket.read_exact(&mut buf).await.unwrap();
    drop(socket);

    client_ctx.shutdown();
    // The ingress loop exits on cancellation and drops its listener;
    // fresh connections are then refused (allow a moment for the task
    // to observe the cancellation)
    let refused = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match TcpStream::connect(listener).await {
                Err(_) => return true,
                Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(refused, "listener still accepting after shutdown");
}
