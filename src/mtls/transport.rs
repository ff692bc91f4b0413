//! Instrumented TLS transport.
//!
//! [`TlsListener`] composes a `TcpListener` with a `tokio_rustls::TlsAcceptor`
//! and implements [`axum::serve::Listener`], so the stock axum server runs
//! on top of it. Accepting and the handshake each log their own events; the
//! outcome of the handshake is decided by rustls alone. Handshakes run
//! concurrently, each in its own task under the handshake timeout.
//!
//! ```text
//! TcpListener::accept ── "Accepting connection"
//!   → TlsAcceptor::accept ── "Starting handshake" / "Handshake done" / "Handshake failed"
//!   → PeerStream { PeerConnection { remote_addr, peer certificate } }
//!   → axum ConnectInfo<PeerConnection> in every request
//! ```

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, error, info, warn};

/// Failure of a single TLS handshake. The listener keeps running.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The peer did not finish the handshake in time.
    #[error("TLS handshake timed out after {0:?}")]
    Timeout(Duration),

    /// rustls rejected the handshake (bad or missing client cert, protocol error).
    #[error("TLS handshake failed: {0}")]
    Tls(#[from] io::Error),
}

/// What the transport learned about a peer during the handshake.
///
/// Lives as long as its TCP connection.
#[derive(Clone, Debug)]
pub struct PeerConnection {
    remote_addr: SocketAddr,
    certificate: Option<Arc<CertificateDer<'static>>>,
}

impl PeerConnection {
    /// Create connection info for a peer.
    #[must_use]
    pub fn new(remote_addr: SocketAddr, certificate: Option<CertificateDer<'static>>) -> Self {
        Self {
            remote_addr,
            certificate: certificate.map(Arc::new),
        }
    }

    /// Peer socket address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// DER of the peer's end-entity certificate, if one was presented.
    #[must_use]
    pub fn certificate_der(&self) -> Option<&[u8]> {
        self.certificate.as_deref().map(AsRef::as_ref)
    }
}

/// A TLS stream tagged with its [`PeerConnection`].
pub struct PeerStream {
    inner: TlsStream<TcpStream>,
    peer: PeerConnection,
}

impl PeerStream {
    /// Connection info for this stream.
    #[must_use]
    pub fn peer(&self) -> &PeerConnection {
        &self.peer
    }
}

impl AsyncRead for PeerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PeerStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// TCP listener that terminates mutual TLS on every accepted socket.
///
/// Each handshake runs in its own task, so a peer that stalls mid-handshake
/// only holds its own connection until the timeout.
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    pending: JoinSet<Result<PeerStream, HandshakeError>>,
}

impl TlsListener {
    /// Wrap a bound TCP listener.
    #[must_use]
    pub fn new(tcp: TcpListener, acceptor: TlsAcceptor, handshake_timeout: Duration) -> Self {
        Self {
            tcp,
            acceptor,
            handshake_timeout,
            pending: JoinSet::new(),
        }
    }

    fn spawn_handshake(&mut self, stream: TcpStream, addr: SocketAddr) {
        let acceptor = self.acceptor.clone();
        let timeout = self.handshake_timeout;
        self.pending.spawn(handshake(acceptor, timeout, stream, addr));
    }
}

/// Wait for the next TCP connection.
///
/// Socket errors only affect the attempt that produced them.
async fn accept_tcp(tcp: &TcpListener) -> (TcpStream, SocketAddr) {
    loop {
        debug!("Accepting connection");
        match tcp.accept().await {
            Ok((stream, addr)) => {
                debug!(peer_addr = %addr, "Done accepting connection");
                return (stream, addr);
            }
            Err(e) if is_connection_error(&e) => {
                warn!(error = %e, "Connection error while accepting");
            }
            Err(e) => {
                // EMFILE and friends: back off instead of spinning.
                error!(error = %e, "Accept error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Run the TLS handshake for one accepted socket.
///
/// Returns [`HandshakeError`] when rustls rejects the peer or the handshake
/// exceeds `handshake_timeout`. The stream is unusable afterwards.
async fn handshake(
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<PeerStream, HandshakeError> {
    debug!(peer_addr = %addr, "Starting handshake");

    let tls = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            warn!(peer_addr = %addr, error = %e, "Handshake failed");
            return Err(HandshakeError::Tls(e));
        }
        Err(_) => {
            warn!(
                peer_addr = %addr,
                timeout_secs = handshake_timeout.as_secs(),
                "Handshake timed out"
            );
            return Err(HandshakeError::Timeout(handshake_timeout));
        }
    };

    let certificate = peer_certificate(&tls);
    info!(
        peer_addr = %addr,
        client_cert = certificate.is_some(),
        "Done with handshake"
    );

    Ok(PeerStream {
        inner: tls,
        peer: PeerConnection::new(addr, certificate),
    })
}

impl axum::serve::Listener for TlsListener {
    type Io = PeerStream;
    type Addr = SocketAddr;

    /// Accepts sockets and hands back whichever handshake finishes first.
    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            tokio::select! {
                (stream, addr) = accept_tcp(&self.tcp) => {
                    self.spawn_handshake(stream, addr);
                }
                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    match joined {
                        Ok(Ok(peer_stream)) => {
                            let addr = peer_stream.peer().remote_addr();
                            return (peer_stream, addr);
                        }
                        // Already logged by the handshake task.
                        Ok(Err(_)) => {}
                        Err(e) => error!(error = %e, "Handshake task failed"),
                    }
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.tcp.local_addr()
    }
}

impl Connected<IncomingStream<'_, TlsListener>> for PeerConnection {
    fn connect_info(stream: IncomingStream<'_, TlsListener>) -> Self {
        stream.io().peer().clone()
    }
}

/// The first certificate in the chain is the client's own.
fn peer_certificate(tls: &TlsStream<TcpStream>) -> Option<CertificateDer<'static>> {
    let (_, conn) = tls.get_ref();
    conn.peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.clone().into_owned())
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
