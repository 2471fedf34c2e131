// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Contract tests run against both overlay transports.
//!
//! Every behaviour the rest of the workspace relies on — discovery,
//! ping semantics, stream echo, protocol dispatch, close events — must
//! hold for the in-memory mesh and the QUIC transport alike.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use weft_overlay::{
    MemoryMesh, Overlay, OverlayError, PeerId, ProtocolId, QuicOverlay, QuicOverlayConfig,
    stream_handler,
};

/// A connected pair: `b` can reach `a` and vice versa.
async fn memory_pair() -> (Arc<dyn Overlay>, Arc<dyn Overlay>) {
    let mesh = MemoryMesh::new();
    (mesh.join(), mesh.join())
}

async fn quic_pair() -> (Arc<dyn Overlay>, Arc<dyn Overlay>) {
    let a = QuicOverlay::start(QuicOverlayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    })
    .await
    .unwrap();
    let b = QuicOverlay::start(QuicOverlayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        bootstraps: vec![a.local_addr().unwrap()],
        ..Default::default()
    })
    .await
    .unwrap();
    (a, b)
}

fn install_echo(overlay: &Arc<dyn Overlay>) {
    overlay.set_handler(
        ProtocolId::from("contract-echo/1.0"),
        stream_handler(|mut stream| async move {
            let mut buf = vec![0u8; 1024];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
            }
        }),
    );
}

async fn check_echo(a: Arc<dyn Overlay>, b: Arc<dyn Overlay>) {
    install_echo(&a);
    let mut stream = b
        .open_stream(a.local_peer(), &ProtocolId::from("contract-echo/1.0"))
        .await
        .unwrap();
    assert_eq!(stream.peer(), a.local_peer());

    for payload in [b"first".as_slice(), b"second-message".as_slice()] {
        stream.write_all(payload).await.unwrap();
        stream.flush().await.unwrap();
        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, payload);
    }
}

async fn check_discovery(a: Arc<dyn Overlay>, b: Arc<dyn Overlay>) {
    b.advertise("contract-svc").await.unwrap();
    // Allow the advertisement to propagate (instant for memory, one
    // hello round-trip for QUIC)
    tokio::time::sleep(Duration::from_millis(200)).await;
    let found = a.find_providers("contract-svc").await.unwrap();
    assert_eq!(found, vec![b.local_peer()]);
    assert!(a.find_providers("no-such-rendezvous").await.unwrap().is_empty());
}

async fn check_ping(a: Arc<dyn Overlay>, b: Arc<dyn Overlay>) {
    assert!(!b.ping(a.local_peer()).await.is_zero());
    assert!(b.ping(PeerId::random()).await.is_zero());
}

async fn check_unknown_peer_dial(_a: Arc<dyn Overlay>, b: Arc<dyn Overlay>) {
    let err = b
        .open_stream(PeerId::random(), &ProtocolId::from("contract-echo/1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, OverlayError::UnknownPeer(_)));
}

async fn check_close_event(a: Arc<dyn Overlay>, b: Arc<dyn Overlay>) {
    install_echo(&a);
    let mut events = b.events();
    let stream = b
        .open_stream(a.local_peer(), &ProtocolId::from("contract-echo/1.0"))
        .await
        .unwrap();
    let id = stream.id();
    stream.set_protocol(ProtocolId::from("switched/1.0"));
    stream.reset();

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.stream == id {
                return event;
            }
        }
    })
    .await
    .expect("no close event");
    assert_eq!(event.protocol, ProtocolId::from("switched/1.0"));
}

macro_rules! contract_tests {
    ($name:ident, $pair:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn test_echo() {
                let (a, b) = $pair().await;
                check_echo(a, b).await;
            }

            #[tokio::test]
            async fn test_discovery() {
                let (a, b) = $pair().await;
                check_discovery(a, b).await;
            }

            #[tokio::test]
            async fn test_ping() {
                let (a, b) = $pair().await;
                check_ping(a, b).await;
            }

            #[tokio::test]
            async fn test_unknown_peer_dial() {
                let (a, b) = $pair().await;
                check_unknown_peer_dial(a, b).await;
            }

            #[tokio::test]
            async fn test_close_event() {
                let (a, b) = $pair().await;
                check_close_event(a, b).await;
            }
        }
    };
}

contract_tests!(memory, memory_pair);
contract_tests!(quic, quic_pair);
