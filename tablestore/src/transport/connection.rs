//! Pooled connection and the `Transport`/`Io` seams spec.md section 6 calls
//! out as an external interface: "a `Transport` interface defines what it
//! consumes from the HTTP layer". Grounded in the teacher's
//! `client/src/tls/stream.rs` (`Io` as a blanket trait over
//! `AsyncRead + AsyncWrite`) and `client/src/tls/connector.rs` (boxed dyn
//! connector so http/https selection doesn't need a type parameter threaded
//! through the whole pipeline).

use std::sync::Arc;

use futures_core::future::BoxFuture;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, TransportStatus};
use crate::transport::uri::{Endpoint, Scheme};

/// Blanket async byte-stream trait, boxed so a connection can be either a
/// plain TCP socket or a TLS session without a generic parameter on every
/// type that holds one.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// spec.md section 3: "Connection: owns a socket + TLS session; has state ∈
/// {Idle, Reserved, InUse, Closing}." Reserved covers the window between a
/// waiter being woken and the connection object actually changing hands;
/// this crate's pool resolves that window synchronously under its lock, so
/// only Idle/InUse/Closing are ever observable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Closing,
}

/// A leased socket plus whatever TLS session wraps it. `state` is bookkeeping
/// only — transitions are driven by the pool that owns the connection.
pub struct Connection {
    io: Box<dyn Io>,
    state: ConnectionState,
}

impl Connection {
    pub(crate) fn new(io: Box<dyn Io>) -> Self {
        Self { io, state: ConnectionState::InUse }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn io_mut(&mut self) -> &mut (dyn Io + 'static) {
        &mut *self.io
    }
}

/// What the pool consumes to turn an [`Endpoint`] into a byte stream. The
/// default [`TcpTlsTransport`] speaks real TCP/TLS; tests substitute a
/// `Transport` that replays literal bytes (spec.md section 8's end-to-end
/// scenarios), grounded in
/// `examples/original_source/test/unittest/core/response_reader_unittest.cpp`.
pub trait Transport: Send + Sync {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Io>, Error>>;
}

/// Real TCP/TLS transport: plain `TcpStream` for `http://`, a `rustls`
/// session over that stream for `https://`.
pub struct TcpTlsTransport {
    tls_config: Arc<rustls::ClientConfig>,
}

impl TcpTlsTransport {
    pub fn new() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self { tls_config: Arc::new(config) }
    }
}

impl Default for TcpTlsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTlsTransport {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Io>, Error>> {
        Box::pin(async move {
            let addr = (endpoint.host.as_str(), endpoint.port);
            let tcp = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::transport(TransportStatus::CouldntConnect, format!("connect to {endpoint}: {e}")))?;
            let _ = tcp.set_nodelay(true);

            match endpoint.scheme {
                Scheme::Http => Ok(Box::new(tcp) as Box<dyn Io>),
                Scheme::Https => {
                    let connector = tokio_rustls::TlsConnector::from(self.tls_config.clone());
                    let name = ServerName::try_from(endpoint.host.clone())
                        .map_err(|_| Error::transport(TransportStatus::SslHandshakeFail, "invalid DNS name for TLS SNI"))?;
                    let tls = connector
                        .connect(name, tcp)
                        .await
                        .map_err(|e| Error::transport(TransportStatus::SslHandshakeFail, format!("TLS handshake: {e}")))?;
                    Ok(Box::new(tls) as Box<dyn Io>)
                }
            }
        })
    }
}
