//! Outgoing connection factories and the peer handshake.
//!
//! A [`ConnectionRegistry`] maps a URI scheme to a factory that dials an
//! address and yields a byte stream. The engine owns the registry and hands
//! it to whatever dials peers; tests register in-memory schemes the same way
//! TCP is registered.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::constants::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT};
use crate::peer::{Handshake, PeerError, PeerTransport};

/// A connected byte stream of any transport.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

pub type BoxedStream = Box<dyn PeerStream>;

pub type ConnectFuture = BoxFuture<'static, io::Result<BoxedStream>>;

type Factory = Arc<dyn Fn(SocketAddr) -> ConnectFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no connection factory for scheme {0:?}")]
    UnknownScheme(String),

    #[error("invalid peer uri: {0}")]
    InvalidUri(String),

    #[error("connect timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry dialing `ipv4` and `ipv6` peers over TCP.
    pub fn with_tcp() -> Self {
        let mut registry = Self::new();
        registry.register("ipv4", connect_tcp);
        registry.register("ipv6", connect_tcp);
        registry
    }

    /// Registers `factory` for `scheme`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, scheme: &str, factory: F)
    where
        F: Fn(SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<BoxedStream>> + Send + 'static,
    {
        let factory: Factory = Arc::new(move |addr| factory(addr).boxed());
        self.factories.insert(scheme.to_ascii_lowercase(), factory);
    }

    pub fn unregister(&mut self, scheme: &str) -> bool {
        self.factories.remove(&scheme.to_ascii_lowercase()).is_some()
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Dials a `scheme://host:port` uri.
    pub async fn connect(&self, uri: &str) -> Result<BoxedStream, ConnectionError> {
        let (scheme, addr) = parse_uri(uri)?;
        let factory = self
            .factories
            .get(&scheme)
            .ok_or(ConnectionError::UnknownScheme(scheme))?;

        debug!(%uri, "connecting");
        timeout(CONNECT_TIMEOUT, factory(addr))
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .map_err(ConnectionError::Io)
    }
}

fn connect_tcp(addr: SocketAddr) -> impl Future<Output = io::Result<BoxedStream>> + Send {
    async move {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream) as BoxedStream)
    }
}

/// The uri a peer address is dialed with.
pub fn peer_uri(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(_) => format!("ipv4://{addr}"),
        SocketAddr::V6(_) => format!("ipv6://{addr}"),
    }
}

fn parse_uri(uri: &str) -> Result<(String, SocketAddr), ConnectionError> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| ConnectionError::InvalidUri(uri.to_string()))?;
    let addr = rest
        .trim_end_matches('/')
        .parse()
        .map_err(|_| ConnectionError::InvalidUri(uri.to_string()))?;
    Ok((scheme.to_ascii_lowercase(), addr))
}

/// Sends our handshake first, then reads the peer's.
pub async fn handshake_outgoing<S>(
    stream: S,
    ours: &Handshake,
) -> Result<(PeerTransport<S>, Handshake), PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut transport = PeerTransport::new(stream);
        transport.send_handshake(ours).await?;
        let theirs = transport.receive_handshake(ours).await?;
        Ok::<_, PeerError>((transport, theirs))
    })
    .await
    .map_err(|_| PeerError::Timeout)?
}

/// Reads the peer's handshake first; ours is only sent when the info hash
/// matches.
pub async fn handshake_incoming<S>(
    stream: S,
    ours: &Handshake,
) -> Result<(PeerTransport<S>, Handshake), PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut transport = PeerTransport::new(stream);
        let theirs = transport.receive_handshake(ours).await?;
        transport.send_handshake(ours).await?;
        Ok::<_, PeerError>((transport, theirs))
    })
    .await
    .map_err(|_| PeerError::Timeout)?
}
