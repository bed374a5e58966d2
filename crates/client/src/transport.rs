//! Transports that carry [`Frame`]s to and from the service.
//!
//! Two implementations exist behind the [`Transport`] trait: a WebSocket
//! carrying one JSON text message per frame, and a raw TCP stream using the
//! length-prefixed packet encoding. The connection engine drives whichever
//! one the endpoint selects; everything above the trait is transport
//! agnostic.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{crypto::ring, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::codec::Framed;

use oneme_wire::{Frame, PacketCodec, PacketError};

/// WebSocket endpoint of the production service.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://ws-api.oneme.ru/websocket";

/// TCP endpoint of the production service.
pub const DEFAULT_TCP_ADDR: &str = "api.oneme.ru:443";

/// Origin header the service expects from web clients.
pub const DEFAULT_ORIGIN: &str = "https://web.max.ru";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpoint selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where and how to reach the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// WebSocket URL, `ws://` or `wss://`.
    Ws(String),
    /// TCP address in `host:port` form, packet framing. With `tls` the
    /// stream is wrapped in verified TLS before any framing.
    Tcp { addr: String, tls: bool },
}

impl Endpoint {
    pub fn official_ws() -> Self {
        Endpoint::Ws(DEFAULT_WEBSOCKET_URL.to_string())
    }

    /// The production packet endpoint. It only speaks TLS.
    pub fn official_tcp() -> Self {
        Endpoint::Tcp {
            addr: DEFAULT_TCP_ADDR.to_string(),
            tls: true,
        }
    }

    /// Plaintext packet framing, for local or test services.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Endpoint::Tcp {
            addr: addr.into(),
            tls: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet: {0}")]
    Packet(#[from] PacketError),

    #[error("tls: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("bad endpoint: {0}")]
    BadEndpoint(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Ws(Box::new(e))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A connected bidirectional frame stream.
///
/// `recv` returning `Ok(None)` is an orderly close from the peer; `Err` is
/// a fault. Either one ends the connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
    async fn close(&mut self);
}

/// Dial `endpoint` and return a connected transport.
pub(crate) async fn connect(
    endpoint: &Endpoint,
    origin: &str,
) -> Result<Box<dyn Transport>, TransportError> {
    match endpoint {
        Endpoint::Ws(url) => Ok(Box::new(WsTransport::connect(url, origin).await?)),
        Endpoint::Tcp { addr, tls } => Ok(Box::new(TcpTransport::connect(addr, *tls).await?)),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    async fn connect(url: &str, origin: &str) -> Result<Self, TransportError> {
        let mut request = url.into_client_request()?;
        let origin_value = origin
            .parse::<HeaderValue>()
            .map_err(|_| TransportError::BadEndpoint(format!("invalid origin {origin:?}")))?;
        request.headers_mut().insert("Origin", origin_value);

        let (stream, _response) = connect_async(request).await?;
        tracing::debug!(url, "websocket connected");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let text = serde_json::to_string(&frame)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Binary payloads and ping/pong control frames are not part
                // of the protocol here.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TCP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TcpTransport {
    framed: Framed<TcpIo, PacketCodec>,
}

/// Socket under the packet framing, TLS-wrapped when the endpoint asks
/// for it.
enum TcpIo {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl AsyncRead for TcpIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TcpIo::Plain(s) => Pin::new(s).poll_read(cx, buf),
            TcpIo::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TcpIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TcpIo::Plain(s) => Pin::new(s).poll_write(cx, data),
            TcpIo::Tls(s) => Pin::new(s).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TcpIo::Plain(s) => Pin::new(s).poll_flush(cx),
            TcpIo::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TcpIo::Plain(s) => Pin::new(s).poll_shutdown(cx),
            TcpIo::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl TcpTransport {
    async fn connect(addr: &str, tls: bool) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let io = if tls {
            let host = tls_host(addr);
            let domain = ServerName::try_from(host.to_owned())
                .map_err(|_| TransportError::BadEndpoint(format!("invalid tls host {host:?}")))?;
            TcpIo::Tls(tls_connector()?.connect(domain, stream).await?)
        } else {
            TcpIo::Plain(stream)
        };
        tracing::debug!(addr, tls, "tcp connected");
        Ok(Self {
            framed: Framed::new(io, PacketCodec::default()),
        })
    }
}

/// Server name to verify the certificate against: the host part of a
/// `host:port` address, brackets stripped for IPv6 literals.
fn tls_host(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, _port)) => host.trim_start_matches('[').trim_end_matches(']'),
        None => addr,
    }
}

/// Connector trusting the bundled web roots, the same set the WebSocket
/// transport verifies against.
fn tls_connector() -> Result<TlsConnector, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.framed.send(frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(frame)),
            // Framing faults are unrecoverable; resynchronizing inside a
            // corrupted byte stream is not possible.
            Some(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(&mut self.framed).await;
    }
}
