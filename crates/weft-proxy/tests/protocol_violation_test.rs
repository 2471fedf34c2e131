// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chain setup in the face of misbehaving peers.

mod common;

use bytes::Bytes;

use weft_overlay::{Overlay, stream_handler};
use weft_protocol::{CHAIN_SETUP_PROTO, ChainMessage, ChainSpec, read_message, write_message};
use weft_proxy::ProxyError;
use weft_proxy::chain::setup_chain;

use common::{TestNet, tcp_echo_server};

/// Register a rogue provider of "echo" whose chain-setup handler sends
/// one scripted reply and hangs up.
async fn rogue_provider(net: &TestNet, reply: ChainMessage) {
    let overlay = net.mesh.join();
    overlay.advertise("Qmecho").await.unwrap();
    overlay.set_handler(
        weft_overlay::ProtocolId::from(CHAIN_SETUP_PROTO),
        stream_handler(move |mut stream| {
            let reply = reply.clone();
            Box::pin(async move {
                let _ = read_message(&mut stream).await;
                let _ = write_message(&mut stream, &reply).await;
            })
        }),
    );
}

#[tokio::test]
async fn test_error_reply_surfaces_as_chain_setup_failure() {
    let net = TestNet::new(&["echo"]);
    rogue_provider(&net, ChainMessage::Error("no capacity".to_string())).await;

    let (client_ctx, _) = net.client();
    let spec = ChainSpec::parse(["tcp", "echo"]).unwrap();
    let err = setup_chain(&client_ctx, &spec).await.unwrap_err();
    match err {
        ProxyError::ChainSetup(message) => assert_eq!(message, "no capacity"),
        other => panic!("expected ChainSetup, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unexpected_message_type_is_protocol_violation() {
    let net = TestNet::new(&["echo"]);
    rogue_provider(&net, ChainMessage::Data(Bytes::from_static(b"nonsense"))).await;

    let (client_ctx, _) = net.client();
    let spec = ChainSpec::parse(["tcp", "echo"]).unwrap();
    let err = setup_chain(&client_ctx, &spec).await.unwrap_err();
    assert!(matches!(err, ProxyError::Protocol(_)));
}

#[tokio::test]
async fn test_receiver_rejects_short_spec() {
    let net = TestNet::new(&["echo"]);
    let echo = tcp_echo_server().await;
    let (_sponsor_ctx, sponsor_overlay) = net.sponsor("echo", echo).await;

    let client = net.mesh.join();
    let mut stream = client
        .open_stream(
            sponsor_overlay.local_peer(),
            &weft_overlay::ProtocolId::from(CHAIN_SETUP_PROTO),
        )
        .await
        .unwrap();
    // A raw request below the two-token minimum
    write_message(
        &mut stream,
        &ChainMessage::SetupRequest(vec!["tcp".to_string()]),
    )
    .await
    .unwrap();

    match read_message(&mut stream).await.unwrap() {
        ChainMessage::Error(message) => assert!(message.contains("two tokens")),
        other => panic!("expected Error, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn test_receiver_rejects_duplicate_service_spec() {
    let net = TestNet::new(&["echo"]);
    let echo = tcp_echo_server().await;
    let (_sponsor_ctx, sponsor_overlay) = net.sponsor("echo", echo).await;

    let client = net.mesh.join();
    let mut stream = client
        .open_stream(
            sponsor_overlay.local_peer(),
            &weft_overlay::ProtocolId::from(CHAIN_SETUP_PROTO),
        )
        .await
        .unwrap();
    write_message(
        &mut stream,
        &ChainMessage::SetupRequest(vec![
            "tcp".to_string(),
            "echo".to_string(),
            "other".to_string(),
            "echo".to_string(),
        ]),
    )
    .await
    .unwrap();

    match read_message(&mut stream).await.unwrap() {
        ChainMessage::Error(message) => assert!(message.contains("more than once")),
        other => panic!("expected Error, got {}", other.type_name()),
    }
}
