//! Connection establishment: DNS resolution with random address choice,
//! TCP connect with timeout, optional TLS handshake (spec §4.3).

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rand::seq::SliceRandom;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::tls;
use crate::types::Destination;

/// Either side of the TCP/TLS fork, exposing a single `AsyncRead +
/// AsyncWrite` surface to the sender loop.
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    pub async fn shutdown(&mut self) {
        let _ = match self {
            Connection::Plain(stream) => stream.shutdown().await,
            Connection::Tls(stream) => stream.shutdown().await,
        };
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => std::pin::Pin::new(stream).poll_read(cx, buf),
            Connection::Tls(stream) => std::pin::Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(stream) => std::pin::Pin::new(stream).poll_write(cx, buf),
            Connection::Tls(stream) => std::pin::Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => std::pin::Pin::new(stream).poll_flush(cx),
            Connection::Tls(stream) => std::pin::Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(stream) => std::pin::Pin::new(stream).poll_shutdown(cx),
            Connection::Tls(stream) => std::pin::Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Wraps a TLS handshake failure with the destination it occurred against,
/// while preserving the original error as `source()` so callers can
/// downcast to the underlying `rustls::Error` (e.g. to tell a certificate
/// validation failure apart from a transient reset, spec §4.3/§7).
#[derive(Debug)]
pub struct TlsHandshakeError {
    endpoint: String,
    source: io::Error,
}

impl TlsHandshakeError {
    fn new(destination: &Destination, source: io::Error) -> Self {
        Self {
            endpoint: destination.endpoint.clone(),
            source,
        }
    }

    /// `true` if the handshake failed because the peer's certificate could
    /// not be validated, as opposed to a transport-level reset or timeout.
    pub fn is_certificate_error(&self) -> bool {
        self.source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .is_some_and(|err| matches!(err, rustls::Error::InvalidCertificate(_)))
    }
}

impl std::fmt::Display for TlsHandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tls handshake with {}: {}", self.endpoint, self.source)
    }
}

impl std::error::Error for TlsHandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Resolves `destination.endpoint` via DNS and returns one address chosen
/// uniformly at random among the results (spec §4.3: "improves load
/// distribution and avoids sticky failures").
pub async fn resolve_one(destination: &Destination) -> io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> =
        tokio::net::lookup_host((destination.endpoint.as_str(), destination.port))
            .await?
            .collect();
    addrs
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "DNS lookup returned no addresses"))
}

/// Connects to `destination`, performing a TLS handshake if
/// `destination.tls` is set. Bounded by `tcp_timeout` end to end.
pub async fn connect(destination: &Destination, tcp_timeout: Duration) -> io::Result<Connection> {
    let attempt = async {
        let addr = resolve_one(destination).await?;
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true).ok();

        if destination.tls {
            let server_name = ServerName::try_from(destination.endpoint.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let connector = TlsConnector::from(tls::client_config());
            let tls_stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| io::Error::new(e.kind(), TlsHandshakeError::new(destination, e)))?;
            Ok(Connection::Tls(Box::new(tls_stream)))
        } else {
            Ok(Connection::Plain(tcp))
        }
    };

    match tokio::time::timeout(tcp_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connecting to {destination} timed out after {tcp_timeout:?}"),
        )),
    }
}
