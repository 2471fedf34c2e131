// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local HTTP control endpoint.
//!
//! A client asks for a chain with `GET /<transport>/<service>[...]` and
//! receives, as `text/plain`, the `IP:PORT` of a local L4 listener
//! bound to that chain. Chain setup failures map onto 4xx/5xx with a
//! one-line diagnostic body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use weft_protocol::{ChainSpec, Transport};

use crate::context::ProxyContext;
use crate::error::ProxyError;
use crate::resolve::resolve_service;
use crate::{tcp, udp};

/// Build the control router.
pub fn router(ctx: Arc<ProxyContext>) -> Router {
    Router::new().fallback(handle).with_state(ctx)
}

/// Bind the control endpoint and serve until the context is cancelled.
///
/// Returns the bound address and the server task handle.
pub async fn serve(
    ctx: Arc<ProxyContext>,
    port: u16,
) -> Result<(SocketAddr, JoinHandle<()>), ProxyError> {
    let listener = tokio::net::TcpListener::bind((ctx.ctrl_host, port))
        .await
        .map_err(ProxyError::Listener)?;
    let addr = listener.local_addr().map_err(ProxyError::Listener)?;
    info!(%addr, "control endpoint listening");

    let app = router(ctx.clone());
    let cancel = ctx.cancel.clone();
    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "control endpoint failed");
        }
    });
    Ok((addr, handle))
}

async fn handle(State(ctx): State<Arc<ProxyContext>>, uri: Uri) -> Response {
    info!(%uri, "control request");
    match serve_chain_request(&ctx, &uri).await {
        Ok(addr) => (StatusCode::OK, format!("{addr}\n")).into_response(),
        Err(e) => {
            warn!(%uri, error = %e, "control request failed");
            (e.status(), format!("Error: {e}\n")).into_response()
        }
    }
}

async fn serve_chain_request(
    ctx: &Arc<ProxyContext>,
    uri: &Uri,
) -> Result<SocketAddr, ProxyError> {
    if uri.query().is_some() {
        return Err(ProxyError::BadRequest(
            "query strings are not accepted".to_string(),
        ));
    }

    let segments: Vec<&str> = uri
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let spec = ChainSpec::parse(segments)?;

    // Resolve the first hop up front so lookup and allocation failures
    // surface here instead of after the client connects
    resolve_service(ctx, spec.first_service()).await?;

    match spec.first_transport() {
        Transport::Tcp => tcp::open_tcp(ctx, &spec).await,
        Transport::Udp => udp::open_udp(ctx, &spec).await,
    }
}
