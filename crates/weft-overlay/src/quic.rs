// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC transport for the overlay contract.
//!
//! Each node runs one quinn endpoint in combined client/server mode.
//! Peers learn about each other through a hello exchange performed on
//! every new connection: the hello carries the sender's peer id, its
//! listening port, its rendezvous advertisements, and the peers it
//! already knows, so addresses and advertisements gossip through the
//! mesh from the bootstrap set outward.
//!
//! Streams open with a one-frame JSON preamble naming the sender and the
//! application protocol; pings echo an 8-byte nonce on a dedicated
//! preamble variant.
//!
//! The mesh trusts its pre-shared network key for admission, so TLS here
//! only provides transport encryption: certificates are self-signed and
//! accepted without verification.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use quinn::{ClientConfig, Connection, Endpoint, ServerConfig, TransportConfig};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OverlayError;
use crate::overlay::{Overlay, StreamHandler};
use crate::peer::PeerId;
use crate::stream::{OverlayStream, ProtocolId, StreamEvent};

/// Upper bound on preamble/hello frames.
const MAX_CONTROL_FRAME: usize = 64 * 1024;

/// Capacity of the stream-closed event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

const PING_NONCE_LEN: usize = 8;

/// Configuration for the QUIC overlay transport.
#[derive(Debug, Clone)]
pub struct QuicOverlayConfig {
    /// Address to bind the endpoint to.
    pub bind_addr: SocketAddr,
    /// Addresses of peers to connect to at startup.
    pub bootstraps: Vec<SocketAddr>,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: u64,
    /// Keep-alive interval in milliseconds (0 to disable).
    pub keep_alive_interval_ms: u64,
    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound on a single ping probe in milliseconds.
    pub ping_timeout_ms: u64,
    /// Interval between gossip refresh rounds in milliseconds (0 to
    /// disable).
    pub gossip_interval_ms: u64,
    /// UDP receive buffer size in bytes (0 for OS default).
    pub udp_receive_buffer_size: usize,
    /// UDP send buffer size in bytes (0 for OS default).
    pub udp_send_buffer_size: usize,
}

impl Default for QuicOverlayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4001".parse().unwrap(),
            bootstraps: Vec::new(),
            idle_timeout_ms: 120_000,
            keep_alive_interval_ms: 15_000,
            connect_timeout_ms: 10_000,
            ping_timeout_ms: 2_000,
            gossip_interval_ms: 30_000,
            udp_receive_buffer_size: 2 * 1024 * 1024, // 2MB
            udp_send_buffer_size: 2 * 1024 * 1024,    // 2MB
        }
    }
}

impl QuicOverlayConfig {
    /// Create a configuration from environment variables with defaults.
    ///
    /// Environment variables:
    /// - `WEFT_QUIC_PORT`: endpoint port (default: 4001)
    /// - `WEFT_QUIC_IDLE_TIMEOUT_MS`: idle timeout in ms (default: 120000)
    /// - `WEFT_QUIC_KEEP_ALIVE_MS`: keep-alive interval in ms, 0 to disable (default: 15000)
    /// - `WEFT_QUIC_CONNECT_TIMEOUT_MS`: dial timeout in ms (default: 10000)
    /// - `WEFT_QUIC_PING_TIMEOUT_MS`: ping probe bound in ms (default: 2000)
    /// - `WEFT_QUIC_GOSSIP_MS`: gossip refresh interval in ms, 0 to disable (default: 30000)
    /// - `WEFT_QUIC_UDP_RECV_BUFFER`: UDP receive buffer size in bytes (default: 2097152)
    /// - `WEFT_QUIC_UDP_SEND_BUFFER`: UDP send buffer size in bytes (default: 2097152)
    ///
    /// Bootstraps are not read here; they come from the application
    /// config since a missing bootstrap set is fatal for some roles.
    pub fn from_env() -> Self {
        let default = Self::default();

        let port: u16 = std::env::var("WEFT_QUIC_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4001);

        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            bootstraps: default.bootstraps,
            idle_timeout_ms: std::env::var("WEFT_QUIC_IDLE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.idle_timeout_ms),
            keep_alive_interval_ms: std::env::var("WEFT_QUIC_KEEP_ALIVE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.keep_alive_interval_ms),
            connect_timeout_ms: std::env::var("WEFT_QUIC_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.connect_timeout_ms),
            ping_timeout_ms: std::env::var("WEFT_QUIC_PING_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.ping_timeout_ms),
            gossip_interval_ms: std::env::var("WEFT_QUIC_GOSSIP_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.gossip_interval_ms),
            udp_receive_buffer_size: std::env::var("WEFT_QUIC_UDP_RECV_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.udp_receive_buffer_size),
            udp_send_buffer_size: std::env::var("WEFT_QUIC_UDP_SEND_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.udp_send_buffer_size),
        }
    }
}

/// First frame on every stream.
#[derive(Debug, Serialize, Deserialize)]
enum Preamble {
    /// Application stream: dispatch to the handler for `protocol`.
    Stream { from: PeerId, protocol: String },
    /// Hello exchange; the responder replies with its own [`HelloMsg`].
    Hello(HelloMsg),
    /// RTT probe; the responder echoes an 8-byte nonce.
    Ping,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloMsg {
    peer: PeerId,
    listen_port: u16,
    rendezvous: Vec<String>,
    known: Vec<PeerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeerEntry {
    peer: PeerId,
    addr: SocketAddr,
    rendezvous: Vec<String>,
}

/// QUIC implementation of the overlay contract.
pub struct QuicOverlay {
    id: PeerId,
    endpoint: Endpoint,
    config: QuicOverlayConfig,
    /// Peer id -> dialable address, learned from hellos.
    book: Mutex<HashMap<PeerId, SocketAddr>>,
    /// Rendezvous string -> providers, learned from hellos.
    providers: Mutex<HashMap<String, HashSet<PeerId>>>,
    /// Rendezvous strings this node advertises.
    local_rendezvous: Mutex<HashSet<String>>,
    /// Open connections, reused across streams.
    conns: tokio::sync::Mutex<HashMap<PeerId, Connection>>,
    handlers: Mutex<HashMap<ProtocolId, StreamHandler>>,
    events: broadcast::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl QuicOverlay {
    /// Bind the endpoint, start the accept loop, and dial the bootstrap
    /// set (best effort).
    pub async fn start(config: QuicOverlayConfig) -> Result<Arc<Self>, OverlayError> {
        let endpoint = Self::build_endpoint(&config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let overlay = Arc::new(Self {
            id: PeerId::random(),
            endpoint,
            config,
            book: Mutex::new(HashMap::new()),
            providers: Mutex::new(HashMap::new()),
            local_rendezvous: Mutex::new(HashSet::new()),
            conns: tokio::sync::Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            events,
            cancel: CancellationToken::new(),
        });

        info!(
            peer = %overlay.id,
            addr = %overlay.endpoint.local_addr()?,
            "overlay endpoint bound"
        );

        let accept = overlay.clone();
        tokio::spawn(async move { accept.accept_loop().await });

        for addr in overlay.config.bootstraps.clone() {
            match overlay.connect_addr(addr).await {
                Ok(peer) => info!(%peer, %addr, "connected to bootstrap"),
                Err(e) => warn!(%addr, error = %e, "bootstrap dial failed"),
            }
        }

        if overlay.config.gossip_interval_ms > 0 {
            let maintenance = overlay.clone();
            tokio::spawn(async move { maintenance.maintenance_loop().await });
        }

        Ok(overlay)
    }

    /// Periodically prune dead connections and re-exchange hellos so
    /// late advertisements and newly learned peers keep spreading.
    async fn maintenance_loop(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.gossip_interval_ms);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let mut conns = self.conns.lock().await;
            conns.retain(|peer, conn| {
                let open = conn.close_reason().is_none();
                if !open {
                    debug!(%peer, "pruning closed connection");
                }
                open
            });
            let live: Vec<Connection> = conns.values().cloned().collect();
            drop(conns);

            for conn in live {
                if let Err(e) = self.hello_exchange(&conn).await {
                    debug!(error = %e, "gossip refresh failed");
                }
            }
        }
    }

    /// The endpoint's bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, OverlayError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Shut the endpoint down; pending operations fail with `Closed`.
    pub fn close(&self) {
        self.cancel.cancel();
        self.endpoint.close(0u32.into(), b"overlay closing");
    }

    fn build_endpoint(config: &QuicOverlayConfig) -> Result<Endpoint, OverlayError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let cert = rcgen::generate_simple_self_signed(vec!["weft".to_string()])
            .map_err(|e| OverlayError::Tls(e.to_string()))?;
        let cert_der = cert.cert.der().clone();
        let key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
            .map_err(|e| OverlayError::Tls(e.to_string()))?;

        let server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key)
            .map_err(|e| OverlayError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(
            Duration::from_millis(config.idle_timeout_ms)
                .try_into()
                .map_err(|_| OverlayError::Tls("idle timeout out of range".to_string()))?,
        ));
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        let transport = Arc::new(transport);

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| OverlayError::Tls(e.to_string()))?,
        ));
        server_config.transport_config(transport.clone());

        // Create the UDP socket with custom buffer sizes using socket2
        let domain = if config.bind_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if config.udp_receive_buffer_size > 0
            && let Err(e) = socket.set_recv_buffer_size(config.udp_receive_buffer_size)
        {
            warn!(size = config.udp_receive_buffer_size, error = %e,
                "failed to set UDP receive buffer size");
        }
        if config.udp_send_buffer_size > 0
            && let Err(e) = socket.set_send_buffer_size(config.udp_send_buffer_size)
        {
            warn!(size = config.udp_send_buffer_size, error = %e,
                "failed to set UDP send buffer size");
        }
        socket.bind(&config.bind_addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();

        let runtime = quinn::default_runtime()
            .ok_or_else(|| OverlayError::Dial("no async runtime found".to_string()))?;
        let mut endpoint = Endpoint::new_with_abstract_socket(
            quinn::EndpointConfig::default(),
            Some(server_config),
            runtime.wrap_udp_socket(std_socket)?,
            runtime,
        )?;

        let client_crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth();
        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| OverlayError::Tls(e.to_string()))?,
        ));
        client_config.transport_config(transport);
        endpoint.set_default_client_config(client_config);

        Ok(endpoint)
    }

    async fn accept_loop(self: Arc<Self>) {
        loop {
            let incoming = tokio::select! {
                _ = self.cancel.cancelled() => return,
                incoming = self.endpoint.accept() => match incoming {
                    Some(incoming) => incoming,
                    None => return,
                },
            };
            let overlay = self.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => overlay.serve_connection(conn).await,
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                }
            });
        }
    }

    async fn serve_connection(self: Arc<Self>, conn: Connection) {
        let remote = conn.remote_address();
        debug!(%remote, "accepted connection");
        loop {
            let (send, recv) = tokio::select! {
                _ = self.cancel.cancelled() => return,
                accepted = conn.accept_bi() => match accepted {
                    Ok(pair) => pair,
                    Err(quinn::ConnectionError::ApplicationClosed(_))
                    | Err(quinn::ConnectionError::LocallyClosed) => {
                        debug!(%remote, "connection closed");
                        return;
                    }
                    Err(e) => {
                        warn!(%remote, error = %e, "error accepting stream");
                        return;
                    }
                },
            };
            let overlay = self.clone();
            let conn = conn.clone();
            tokio::spawn(async move {
                if let Err(e) = overlay.serve_stream(&conn, send, recv).await {
                    debug!(remote = %conn.remote_address(), error = %e, "inbound stream error");
                }
            });
        }
    }

    async fn serve_stream(
        &self,
        conn: &Connection,
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
    ) -> Result<(), OverlayError> {
        let preamble: Preamble = read_json(&mut recv).await?;
        match preamble {
            Preamble::Hello(hello) => {
                self.absorb_hello(conn.remote_address(), hello);
                write_json(&mut send, &self.build_hello()).await?;
                let _ = send.finish();
            }
            Preamble::Ping => {
                let mut nonce = [0u8; PING_NONCE_LEN];
                recv.read_exact(&mut nonce)
                    .await
                    .map_err(|e| OverlayError::Handshake(e.to_string()))?;
                send.write_all(&nonce).await.map_err(std::io::Error::other)?;
                let _ = send.finish();
            }
            Preamble::Stream { from, protocol } => {
                let protocol = ProtocolId::new(protocol);
                let handler = self
                    .handlers
                    .lock()
                    .expect("handler lock poisoned")
                    .get(&protocol)
                    .cloned();
                let Some(handler) = handler else {
                    debug!(%from, %protocol, "no handler for inbound stream");
                    return Ok(());
                };
                let stream = OverlayStream::new(
                    from,
                    protocol,
                    Box::new(recv),
                    Box::new(send),
                    self.events.clone(),
                );
                handler(stream).await;
            }
        }
        Ok(())
    }

    /// Dial an address and perform the hello exchange.
    async fn connect_addr(&self, addr: SocketAddr) -> Result<PeerId, OverlayError> {
        let connecting = self
            .endpoint
            .connect(addr, "weft")
            .map_err(|e| OverlayError::Dial(e.to_string()))?;
        let conn = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connecting,
        )
        .await
        .map_err(|_| OverlayError::Dial(format!("dial {addr} timed out")))?
        .map_err(|e| OverlayError::Dial(e.to_string()))?;

        let peer = self.hello_exchange(&conn).await?;
        self.conns.lock().await.insert(peer, conn);
        self.book.lock().expect("book lock poisoned").insert(peer, addr);
        Ok(peer)
    }

    async fn hello_exchange(&self, conn: &Connection) -> Result<PeerId, OverlayError> {
        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| OverlayError::Dial(e.to_string()))?;
        write_json(&mut send, &Preamble::Hello(self.build_hello())).await?;
        let _ = send.finish();
        let reply: HelloMsg = read_json(&mut recv).await?;
        let peer = reply.peer;
        self.absorb_hello(conn.remote_address(), reply);
        Ok(peer)
    }

    fn build_hello(&self) -> HelloMsg {
        let book = self.book.lock().expect("book lock poisoned").clone();
        let providers = self.providers.lock().expect("providers lock poisoned");
        let known = book
            .iter()
            .map(|(peer, addr)| PeerEntry {
                peer: *peer,
                addr: *addr,
                rendezvous: providers
                    .iter()
                    .filter(|(_, peers)| peers.contains(peer))
                    .map(|(r, _)| r.clone())
                    .collect(),
            })
            .collect();
        HelloMsg {
            peer: self.id,
            listen_port: self.endpoint.local_addr().map(|a| a.port()).unwrap_or(0),
            rendezvous: self
                .local_rendezvous
                .lock()
                .expect("rendezvous lock poisoned")
                .iter()
                .cloned()
                .collect(),
            known,
        }
    }

    fn absorb_hello(&self, remote: SocketAddr, hello: HelloMsg) {
        let sender_addr = SocketAddr::new(remote.ip(), hello.listen_port);
        let mut book = self.book.lock().expect("book lock poisoned");
        let mut providers = self.providers.lock().expect("providers lock poisoned");

        book.insert(hello.peer, sender_addr);
        for r in &hello.rendezvous {
            providers.entry(r.clone()).or_default().insert(hello.peer);
        }
        for entry in hello.known {
            if entry.peer == self.id {
                continue;
            }
            book.entry(entry.peer).or_insert(entry.addr);
            for r in entry.rendezvous {
                providers.entry(r).or_default().insert(entry.peer);
            }
        }
    }

    async fn conn_for_peer(&self, peer: PeerId) -> Result<Connection, OverlayError> {
        {
            let conns = self.conns.lock().await;
            if let Some(conn) = conns.get(&peer)
                && conn.close_reason().is_none()
            {
                return Ok(conn.clone());
            }
        }
        let addr = self
            .book
            .lock()
            .expect("book lock poisoned")
            .get(&peer)
            .copied()
            .ok_or(OverlayError::UnknownPeer(peer))?;
        self.connect_addr(addr).await?;
        let conns = self.conns.lock().await;
        conns
            .get(&peer)
            .cloned()
            .ok_or(OverlayError::UnknownPeer(peer))
    }
}

#[async_trait]
impl Overlay for QuicOverlay {
    fn local_peer(&self) -> PeerId {
        self.id
    }

    async fn advertise(&self, rendezvous: &str) -> Result<(), OverlayError> {
        self.local_rendezvous
            .lock()
            .expect("rendezvous lock poisoned")
            .insert(rendezvous.to_string());

        // Push the updated hello to peers we already talk to
        let conns: Vec<Connection> = self.conns.lock().await.values().cloned().collect();
        for conn in conns {
            if conn.close_reason().is_some() {
                continue;
            }
            if let Err(e) = self.hello_exchange(&conn).await {
                debug!(error = %e, "hello refresh failed");
            }
        }
        Ok(())
    }

    async fn find_providers(&self, rendezvous: &str) -> Result<Vec<PeerId>, OverlayError> {
        let providers = self.providers.lock().expect("providers lock poisoned");
        Ok(providers
            .get(rendezvous)
            .map(|peers| peers.iter().copied().filter(|p| *p != self.id).collect())
            .unwrap_or_default())
    }

    async fn ping(&self, peer: PeerId) -> Duration {
        let deadline = Duration::from_millis(self.config.ping_timeout_ms);
        let probe = async {
            let conn = self.conn_for_peer(peer).await.ok()?;
            let (mut send, mut recv) = conn.open_bi().await.ok()?;
            write_json(&mut send, &Preamble::Ping).await.ok()?;

            let mut nonce = [0u8; PING_NONCE_LEN];
            rand::rng().fill_bytes(&mut nonce);
            let started = Instant::now();
            send.write_all(&nonce).await.ok()?;
            let mut echo = [0u8; PING_NONCE_LEN];
            recv.read_exact(&mut echo).await.ok()?;
            if echo != nonce {
                return None;
            }
            // A measured zero would read as "unreachable"; clamp up
            Some(started.elapsed().max(Duration::from_micros(1)))
        };
        match tokio::time::timeout(deadline, probe).await {
            Ok(Some(rtt)) => rtt,
            _ => Duration::ZERO,
        }
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &ProtocolId,
    ) -> Result<OverlayStream, OverlayError> {
        let conn = self.conn_for_peer(peer).await?;
        let (mut send, recv) = conn
            .open_bi()
            .await
            .map_err(|e| OverlayError::Dial(e.to_string()))?;
        write_json(
            &mut send,
            &Preamble::Stream {
                from: self.id,
                protocol: protocol.as_str().to_string(),
            },
        )
        .await?;
        Ok(OverlayStream::new(
            peer,
            protocol.clone(),
            Box::new(recv),
            Box::new(send),
            self.events.clone(),
        ))
    }

    fn set_handler(&self, protocol: ProtocolId, handler: StreamHandler) {
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .insert(protocol, handler);
    }

    fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }
}

/// Certificate verifier that skips all verification.
///
/// Admission control for the mesh is the pre-shared network key, not the
/// TLS certificate chain.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

async fn write_json<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), OverlayError> {
    let payload = serde_json::to_vec(value).map_err(|e| OverlayError::Handshake(e.to_string()))?;
    if payload.len() > MAX_CONTROL_FRAME {
        return Err(OverlayError::Handshake(format!(
            "control frame too large: {} bytes",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    Ok(())
}

async fn read_json<R: AsyncRead + Unpin, T: for<'de> Deserialize<'de>>(
    reader: &mut R,
) -> Result<T, OverlayError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_CONTROL_FRAME {
        return Err(OverlayError::Handshake(format!(
            "control frame too large: {len} bytes"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload).map_err(|e| OverlayError::Handshake(e.to_string()))
}
