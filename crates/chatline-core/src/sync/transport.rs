//! Transport seam
//!
//! The connection actor only ever sees a [`Link`]: a sink of outbound
//! [`Frame`]s and a stream of inbound text frames. [`WsConnector`] produces
//! links over `tokio-tungstenite`; [`MemoryConnector`] produces in-process
//! links so connection behaviour can be driven without a network.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::{sink, stream, FutureExt, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use super::message::{ClientEnvelope, ServerEnvelope};

/// Errors raised by a transport
///
/// All of these but `Unauthorized` are recoverable from the connection's
/// point of view: they move it into `Reconnecting`.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server refused the bearer token during the upgrade
    #[error("Server rejected the session token")]
    Unauthorized,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether retrying with the same session is pointless
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized)
    }
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON envelope
    Text(String),
    /// Liveness probe
    Ping,
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open connection, split into its write and read halves
pub struct Link {
    pub sink: FrameSink,
    pub stream: TextStream,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Where to connect and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub token: String,
}

/// Opens links
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// WebSocket connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>> {
        async move {
            let mut ws_request = request.url.as_str().into_client_request()?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", request.token))
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            ws_request.headers_mut().insert(AUTHORIZATION, bearer);

            debug!("Opening WebSocket to {}", request.url);
            let (ws_stream, _) = connect_async(ws_request).await.map_err(|e| match e {
                tungstenite::Error::Http(response)
                    if response.status() == StatusCode::UNAUTHORIZED =>
                {
                    TransportError::Unauthorized
                }
                other => TransportError::WebSocket(other),
            })?;
            let (write, read) = ws_stream.split();

            let sink = write.with(|frame: Frame| {
                future::ready(Ok::<_, TransportError>(match frame {
                    Frame::Text(text) => Message::Text(text),
                    Frame::Ping => Message::Ping(Vec::new()),
                }))
            });

            let stream = read.filter_map(|item| {
                future::ready(match item {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                    Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                    // Ping/pong are answered by tungstenite itself
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into())),
                })
            });

            Ok(Link {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
        .boxed()
    }
}

struct MemoryShared {
    accepting: AtomicBool,
    authorized: AtomicBool,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// In-process connector
///
/// Each successful `connect` hands the server half of the link to the paired
/// [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<MemoryShared>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its connections
    pub fn new() -> (Self, MemoryListener) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MemoryShared {
            accepting: AtomicBool::new(true),
            authorized: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            peers: peers_tx,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryListener {
                shared,
                peers: peers_rx,
            },
        )
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>> {
        let shared = Arc::clone(&self.shared);
        async move {
            shared.attempts.fetch_add(1, Ordering::SeqCst);
            if !shared.accepting.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".to_string()));
            }
            if !shared.authorized.load(Ordering::SeqCst) {
                return Err(TransportError::Unauthorized);
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String, TransportError>>();

            let peer = MemoryPeer {
                request,
                outbound: out_rx,
                inbound: in_tx,
            };
            shared
                .peers
                .send(peer)
                .map_err(|_| TransportError::Connect("listener gone".to_string()))?;

            let sink = sink::unfold(out_tx, |tx, frame: Frame| async move {
                tx.send(frame).map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(tx)
            });
            let stream = stream::unfold(in_rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });

            Ok(Link {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
        .boxed()
    }
}

/// Server side of a [`MemoryConnector`]
pub struct MemoryListener {
    shared: Arc<MemoryShared>,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Refuse (false) or allow (true) subsequent connection attempts
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Reject (false) or accept (true) the bearer token of subsequent attempts
    pub fn set_authorized(&self, authorized: bool) {
        self.shared.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Server half of one in-process link
///
/// Dropping it (or calling [`MemoryPeer::close`]) ends the client's stream.
pub struct MemoryPeer {
    request: ConnectRequest,
    outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryPeer {
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Next frame written by the client
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Next text frame written by the client, skipping pings
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Ping => continue,
            }
        }
    }

    /// Next envelope written by the client, skipping pings
    pub async fn recv_envelope(&mut self) -> Option<ClientEnvelope> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Take a client frame if one is waiting
    pub fn try_recv_frame(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Deliver an envelope to the client; false if the client side is gone
    pub fn push(&self, envelope: &ServerEnvelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(text) => self.push_text(text),
            Err(_) => false,
        }
    }

    /// Deliver a raw text frame to the client
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Ok(text.into())).is_ok()
    }

    /// Fail the client's stream with a transport error
    pub fn fail(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Close the link from the server side
    pub fn close(self) {}
}
