// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP relay tests: request() against a sponsored service's proxy.

mod common;

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use weft_overlay::Overlay;
use weft_proxy::OverlayManager;

use common::TestNet;

/// Minimal HTTP service answering every request with its own path.
async fn path_echo_http_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let Ok(n) = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await else {
                    return;
                };
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    path.len(),
                    path
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_relay_strips_routing_segment() {
    let net = TestNet::new(&["echo"]);
    let service = path_echo_http_server().await;
    let (_sponsor_ctx, sponsor_overlay) = net.sponsor("echo", service).await;

    let (_client_ctx, client_overlay) = net.client();
    let manager = OverlayManager::new(client_overlay);

    let request = Request::builder()
        .method("GET")
        .uri("/echo/stats/daily")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = manager
        .request(sponsor_overlay.local_peer(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // The local service saw the path without the routing segment
    assert_eq!(response.body().as_ref(), b"/stats/daily");
}

#[tokio::test]
async fn test_relay_dead_service_reports_non_responsive() {
    let net = TestNet::new(&["echo"]);
    // Reserve an endpoint with nothing listening on it
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (_sponsor_ctx, sponsor_overlay) = net.sponsor("echo", dead).await;

    let (_client_ctx, client_overlay) = net.client();
    let manager = OverlayManager::new(client_overlay);

    let request = Request::builder()
        .method("GET")
        .uri("/echo/anything")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = manager
        .request(sponsor_overlay.local_peer(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.body().as_ref(), b"Error: program non-responsive");
}
