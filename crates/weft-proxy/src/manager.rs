// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Overlay manager: discovery, allocation requests, and HTTP relay.
//!
//! Discovery ranks provider peers by ping RTT. Allocation speaks the
//! allocator line protocol against ranked allocator candidates, taking
//! the first that answers with a well-formed `IP:PORT`. The HTTP relay
//! carries ordinary HTTP/1.1 between peers, proxying inbound requests
//! to the sponsored microservice.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use weft_overlay::{Overlay, OverlayStream, PeerId, PeerInfo, PerfInd, ProtocolId, rank_peers, stream_handler};
use weft_protocol::line::{read_line, write_line};
use weft_protocol::{ALLOCATOR_PROTO, ALLOCATOR_RENDEZVOUS, CMD_START_PROGRAM, ERR_DEAD_PROGRAM, HTTP_RELAY_PROTO};

/// Shape of a successful allocator reply: dotted-quad IP and a port.
static ALLOC_REPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{1,3}\.){3}\d{1,3}:\d{1,5}$").expect("allocator reply pattern")
});

/// Overlay manager failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    /// No reachable peer offers the service.
    #[error("could not find peer offering service")]
    NotFound,

    /// Every allocator candidate failed or none exist.
    #[error("could not find peer to allocate service")]
    AllocFailed,

    /// No allocator beats the supplied performance bound.
    #[error("could not find better service")]
    NotBetter,

    /// Transport failure talking to a specific peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP relay exchange failed.
    #[error("relay error: {0}")]
    Relay(String),
}

/// Discovery, allocation, and HTTP relay against the overlay.
pub struct OverlayManager {
    overlay: Arc<dyn Overlay>,
}

impl OverlayManager {
    pub fn new(overlay: Arc<dyn Overlay>) -> Self {
        Self { overlay }
    }

    /// Best peer currently advertising `service_hash`.
    pub async fn find_service(&self, service_hash: &str) -> Result<PeerInfo, ManagerError> {
        debug!(hash = service_hash, "finding providers");
        let candidates = self
            .overlay
            .find_providers(service_hash)
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))?;
        let ranked = rank_peers(&*self.overlay, candidates).await;
        ranked.first().copied().ok_or(ManagerError::NotFound)
    }

    /// Ask allocators, best RTT first, to spawn an instance of
    /// `docker_hash`. Returns the allocator that obliged.
    pub async fn allocate_service(&self, docker_hash: &str) -> Result<PeerInfo, ManagerError> {
        let allocators = self.ranked_allocators().await?;
        for candidate in allocators {
            match self.request_alloc(candidate.id, docker_hash).await {
                Ok(endpoint) => {
                    info!(allocator = %candidate.id, %endpoint, "new instance allocated");
                    return Ok(candidate);
                }
                Err(e) => {
                    warn!(allocator = %candidate.id, error = %e, "allocation attempt failed");
                    continue;
                }
            }
        }
        Err(ManagerError::AllocFailed)
    }

    /// Like [`allocate_service`](Self::allocate_service), but gives up
    /// as soon as the best remaining allocator's own RTT is not
    /// strictly below `upper_bound` — candidates are sorted, so nothing
    /// further down can be better either.
    pub async fn allocate_better(
        &self,
        docker_hash: &str,
        upper_bound: PerfInd,
    ) -> Result<PeerInfo, ManagerError> {
        let allocators = self.ranked_allocators().await?;
        for candidate in allocators {
            if !candidate.perf.less_than(&upper_bound) {
                return Err(ManagerError::NotBetter);
            }
            match self.request_alloc(candidate.id, docker_hash).await {
                Ok(endpoint) => {
                    info!(allocator = %candidate.id, %endpoint, "better instance allocated");
                    return Ok(candidate);
                }
                Err(e) => {
                    warn!(allocator = %candidate.id, error = %e, "allocation attempt failed");
                    continue;
                }
            }
        }
        Err(ManagerError::AllocFailed)
    }

    async fn ranked_allocators(&self) -> Result<Vec<PeerInfo>, ManagerError> {
        let candidates = self
            .overlay
            .find_providers(ALLOCATOR_RENDEZVOUS)
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))?;
        Ok(rank_peers(&*self.overlay, candidates).await)
    }

    /// One allocator line-protocol exchange; accepts only a reply
    /// shaped like `IP:PORT`.
    async fn request_alloc(&self, peer: PeerId, docker_hash: &str) -> Result<String, ManagerError> {
        let stream = self
            .overlay
            .open_stream(peer, &ProtocolId::from(ALLOCATOR_PROTO))
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))?;
        let (mut reader, mut writer) = stream.split();

        write_line(&mut writer, &format!("{CMD_START_PROGRAM} {docker_hash}"))
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))?;
        let reply = read_line(&mut reader)
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))?;

        if !ALLOC_REPLY.is_match(&reply) {
            return Err(ManagerError::Transport(format!(
                "returned address does not match format: {reply}"
            )));
        }
        Ok(reply)
    }

    /// Send one HTTP request to a peer's sponsored service over the
    /// relay protocol. The response body is fully buffered.
    pub async fn request(
        &self,
        peer: PeerId,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, ManagerError> {
        let stream = self
            .overlay
            .open_stream(peer, &ProtocolId::from(HTTP_RELAY_PROTO))
            .await
            .map_err(|e| ManagerError::Transport(e.to_string()))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ManagerError::Relay(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "relay connection closed");
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ManagerError::Relay(e.to_string()))?;
        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| ManagerError::Relay(e.to_string()))?
            .to_bytes();
        Ok(Response::from_parts(parts, bytes))
    }

    /// Install the relay handler proxying inbound HTTP requests to the
    /// sponsored service at `endpoint`.
    pub fn serve_local_requests(&self, endpoint: String) {
        self.overlay.set_handler(
            ProtocolId::from(HTTP_RELAY_PROTO),
            stream_handler(move |stream| {
                let endpoint = endpoint.clone();
                async move { relay_connection(stream, endpoint).await }
            }),
        );
    }
}

async fn relay_connection(stream: OverlayStream, endpoint: String) {
    let peer = stream.peer();
    debug!(%peer, "new relay stream");
    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
        let endpoint = endpoint.clone();
        async move { relay_request(request, &endpoint).await }
    });
    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, error = %e, "relay connection ended");
    }
}

/// Proxy one inbound request to the local service.
///
/// The first path segment is the service name that routed the request
/// to this proxy; the local service sees the rest. Bodies are fully
/// buffered in both directions — streaming responses are not supported.
async fn relay_request(
    request: Request<Incoming>,
    endpoint: &str,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    static CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

    let stripped = strip_first_segment(
        request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/"),
    );
    let url = format!("http://{endpoint}{stripped}");
    debug!(%url, "proxying request to service");

    let method = request.method().clone();
    let headers = request.headers().clone();
    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read relayed request body");
            return Ok(dead_program_response());
        }
    };

    let upstream = CLIENT
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await;
    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "local service did not respond");
            return Ok(dead_program_response());
        }
    };

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to read local service response");
            return Ok(dead_program_response());
        }
    };

    let mut response = Response::builder().status(status);
    if let Some(response_headers) = response.headers_mut() {
        for (name, value) in &headers {
            // The body is re-framed with a fresh content length
            if name == hyper::header::TRANSFER_ENCODING || name == hyper::header::CONTENT_LENGTH {
                continue;
            }
            response_headers.insert(name.clone(), value.clone());
        }
    }
    Ok(response
        .body(Full::new(body))
        .unwrap_or_else(|_| dead_program_response()))
}

fn dead_program_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Full::new(Bytes::from_static(ERR_DEAD_PROGRAM.as_bytes())))
        .expect("static response")
}

/// Drop the leading path segment: `/echo/stats?q=1` → `/stats?q=1`.
fn strip_first_segment(path_and_query: &str) -> String {
    let trimmed = path_and_query.strip_prefix('/').unwrap_or(path_and_query);
    match trimmed.split_once('/') {
        Some((_, rest)) => format!("/{rest}"),
        None => {
            // Only the routing segment (plus maybe a query) remains
            match trimmed.split_once('?') {
                Some((_, query)) => format!("/?{query}"),
                None => "/".to_string(),
            }
        }
    }
}
