//! Connection manager
//!
//! Owns the one live WebSocket for the current session. A spawned actor task
//! is the single owner of the transport, the outbound queue and every timer;
//! the cloneable [`ConnectionManager`] handle only posts commands to it, so
//! none of its methods block.
//!
//! Everything the actor forwards is stamped with the session epoch.
//! [`ConnectionManager::disconnect`] advances the epoch before the actor has
//! even seen the command, which lets consumers discard anything still in
//! flight from the torn-down connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::message::{ClientEnvelope, ServerEnvelope};
use super::state::{ConnectionPolicy, ConnectionState, ConnectionStatus, Enqueued, Failure};
use super::transport::{ConnectRequest, Connector, Frame, FrameSink, Link, TextStream};
use crate::config::Config;
use crate::session::Session;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Base WebSocket URL; the socket lives at `{ws_url}/ws/{user_id}`
    pub ws_url: String,
    /// Backoff and queueing policy
    pub policy: ConnectionPolicy,
    /// Ping cadence while connected; `None` disables pings
    pub ping_interval: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000".to_string(),
            policy: ConnectionPolicy::default(),
            ping_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl ConnectionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            policy: ConnectionPolicy {
                base_delay: config.reconnect_base_delay(),
                max_attempts: config.max_reconnect_attempts,
                queue_capacity: config.outbound_queue_capacity,
            },
            ping_interval: config.ping_interval(),
        }
    }
}

/// Events emitted by the connection actor
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// A decoded frame from the server
    Frame(ServerEnvelope),
    /// An envelope that will never be written
    SendFailed(ClientEnvelope),
    /// Retry cap exceeded; no further automatic attempts
    ConnectionLost {
        attempts: u32,
        last_error: Option<String>,
    },
    /// The server refused the session token; no further automatic attempts
    AuthExpired,
}

/// A [`ConnectionEvent`] stamped with the session epoch it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionUpdate {
    pub epoch: u64,
    pub event: ConnectionEvent,
}

#[derive(Debug)]
enum Command {
    Connect(ConnectRequest),
    Send(ClientEnvelope),
    Disconnect,
    Retry,
}

/// Messages from the actor's own helper tasks, tagged with the attempt generation
enum Internal {
    Opened { generation: u64, link: Link },
    Failed { generation: u64, error: String },
    Rejected { generation: u64 },
    Frame { generation: u64, text: String },
    RetryDue { generation: u64 },
    PingDue { generation: u64 },
}

/// Handle to the connection actor
#[derive(Clone)]
pub struct ConnectionManager {
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    epoch: Arc<AtomicU64>,
    ws_url: String,
}

impl ConnectionManager {
    /// Spawn the connection actor
    ///
    /// Returns the handle and the receiver of stamped connection updates.
    /// The actor stops once every handle has been dropped.
    pub fn spawn<C: Connector>(
        connector: C,
        options: ConnectionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionUpdate>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let epoch = Arc::new(AtomicU64::new(0));

        let actor = Actor {
            connector: Arc::new(connector),
            ping_interval: options.ping_interval,
            state: ConnectionState::new(options.policy),
            target: None,
            sink: None,
            reader: None,
            pending: None,
            pinger: None,
            internal_tx,
            update_tx,
            status_tx,
            shared_epoch: Arc::clone(&epoch),
            epoch: 0,
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        (
            Self {
                command_tx,
                status_rx,
                epoch,
                ws_url: options.ws_url,
            },
            update_rx,
        )
    }

    /// Connect for `session`
    ///
    /// A no-op while already connected or connecting for the same session.
    /// Failures surface as status changes, never as errors.
    pub fn connect(&self, session: &Session) {
        self.command(Command::Connect(ConnectRequest {
            url: self.socket_url(&session.user.id),
            token: session.token.clone(),
        }));
    }

    /// Write `envelope` now, or queue it until connected
    pub fn send(&self, envelope: ClientEnvelope) {
        self.command(Command::Send(envelope));
    }

    /// Tear the connection down and clear the outbound queue
    pub fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.command(Command::Disconnect);
    }

    /// Start over after `ConnectionLost`; ignored in any other state
    pub fn retry(&self) {
        self.command(Command::Retry);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Current session epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether `update` belongs to the current session epoch
    pub fn is_current(&self, update: &ConnectionUpdate) -> bool {
        update.epoch == self.epoch()
    }

    fn socket_url(&self, user_id: &str) -> String {
        format!("{}/ws/{}", self.ws_url.trim_end_matches('/'), user_id)
    }

    fn command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            warn!("Connection task has stopped; command dropped");
        }
    }
}

struct Actor {
    connector: Arc<dyn Connector>,
    ping_interval: Option<Duration>,
    state: ConnectionState,
    target: Option<ConnectRequest>,
    sink: Option<FrameSink>,
    reader: Option<JoinHandle<()>>,
    /// In-flight connect attempt or backoff timer
    pending: Option<JoinHandle<()>>,
    pinger: Option<JoinHandle<()>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    update_tx: mpsc::UnboundedSender<ConnectionUpdate>,
    status_tx: watch::Sender<ConnectionStatus>,
    shared_epoch: Arc<AtomicU64>,
    epoch: u64,
}

impl Actor {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("All connection handles dropped, stopping");
                            self.teardown().await;
                            break;
                        }
                    }
                }
                Some(msg) = internal_rx.recv() => self.handle_internal(msg).await,
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(request) => {
                if self.target.as_ref() == Some(&request)
                    && self.state.status() != ConnectionStatus::Disconnected
                {
                    debug!("Already connected for this session");
                    return;
                }

                if self.target.as_ref().is_some_and(|t| t != &request) {
                    info!("Session changed, dropping previous connection");
                    self.teardown().await;
                    self.state.disconnect();
                    self.epoch = self.shared_epoch.fetch_add(1, Ordering::SeqCst) + 1;
                }

                self.target = Some(request);
                let generation = self.state.start();
                self.emit_status();
                self.spawn_attempt(generation);
            }
            Command::Send(envelope) => match self.state.enqueue(envelope) {
                Enqueued::SendNow(envelope) => self.write(vec![envelope]).await,
                Enqueued::Queued { dropped: Some(dropped) } => {
                    warn!("Outbound queue full, dropping oldest envelope");
                    self.emit(ConnectionEvent::SendFailed(dropped));
                }
                Enqueued::Queued { dropped: None } => {
                    debug!("Queued envelope ({} waiting)", self.state.queued_len());
                }
            },
            Command::Disconnect => {
                self.teardown().await;
                self.state.disconnect();
                self.target = None;
                self.epoch = self.shared_epoch.load(Ordering::SeqCst);
                self.emit_status();
                info!("Disconnected");
            }
            Command::Retry => {
                if self.target.is_none() || self.state.status() != ConnectionStatus::Disconnected {
                    debug!("Retry ignored in state {}", self.state.status());
                    return;
                }
                let generation = self.state.start();
                self.emit_status();
                self.spawn_attempt(generation);
            }
        }
    }

    async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Opened { generation, link } => {
                let Some(queued) = self.state.on_open(generation) else {
                    debug!("Discarding stale connection (generation {})", generation);
                    close_sink(link.sink).await;
                    return;
                };

                info!("Connected");
                self.pending = None;
                self.sink = Some(link.sink);
                self.reader = Some(self.spawn_reader(generation, link.stream));
                self.pinger = self.spawn_pinger(generation);
                self.emit_status();

                if !queued.is_empty() {
                    debug!("Flushing {} queued envelopes", queued.len());
                    self.write(queued).await;
                }
            }
            Internal::Failed { generation, error } => {
                self.fail(generation, error).await;
            }
            Internal::Rejected { generation } => {
                if !self.state.is_current(generation) {
                    return;
                }
                warn!("Server rejected the session token, not retrying");
                self.teardown().await;
                self.state.disconnect();
                self.target = None;
                self.emit_status();
                self.emit(ConnectionEvent::AuthExpired);
            }
            Internal::Frame { generation, text } => {
                if !self.state.is_current(generation)
                    || self.state.status() != ConnectionStatus::Connected
                {
                    return;
                }
                match ServerEnvelope::decode(&text) {
                    Ok(ServerEnvelope::Unknown) => debug!("Ignoring unknown frame type"),
                    Ok(envelope) => self.emit(ConnectionEvent::Frame(envelope)),
                    Err(e) => warn!("Ignoring malformed frame: {}", e),
                }
            }
            Internal::RetryDue { generation } => {
                if let Some(generation) = self.state.on_retry_due(generation) {
                    self.emit_status();
                    self.spawn_attempt(generation);
                }
            }
            Internal::PingDue { generation } => {
                if !self.state.is_current(generation)
                    || self.state.status() != ConnectionStatus::Connected
                {
                    return;
                }
                let Some(sink) = self.sink.as_mut() else {
                    return;
                };
                if let Err(e) = sink.send(Frame::Ping).await {
                    self.fail(generation, e.to_string()).await;
                }
            }
        }
    }

    /// Write envelopes in order; on a write error the unwritten rest goes back
    /// to the head of the queue and the link is treated as failed.
    async fn write(&mut self, envelopes: Vec<ClientEnvelope>) {
        let mut remaining = envelopes.into_iter();
        while let Some(envelope) = remaining.next() {
            let text = match envelope.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode envelope: {}", e);
                    self.emit(ConnectionEvent::SendFailed(envelope));
                    continue;
                }
            };

            let result = match self.sink.as_mut() {
                Some(sink) => sink.send(Frame::Text(text)).await.map_err(|e| e.to_string()),
                None => Err("no open link".to_string()),
            };

            if let Err(error) = result {
                warn!("Write failed: {}", error);
                let mut unsent = vec![envelope];
                unsent.extend(remaining);
                self.state.requeue_front(unsent);
                let generation = self.state.generation();
                self.fail(generation, error).await;
                return;
            }
        }
    }

    async fn fail(&mut self, generation: u64, error: String) {
        if !self.state.is_current(generation) {
            return;
        }
        self.teardown().await;

        match self.state.on_failure(generation) {
            Some(Failure::Retry { attempt, delay }) => {
                info!(
                    "Connection failed ({}), retry {} in {:?}",
                    error, attempt, delay
                );
                self.emit_status();
                let generation = self.state.generation();
                let tx = self.internal_tx.clone();
                self.pending = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::RetryDue { generation });
                }));
            }
            Some(Failure::GiveUp { attempts, dropped }) => {
                warn!("Giving up after {} reconnect attempts: {}", attempts, error);
                self.emit_status();
                for envelope in dropped {
                    self.emit(ConnectionEvent::SendFailed(envelope));
                }
                self.emit(ConnectionEvent::ConnectionLost {
                    attempts,
                    last_error: Some(error),
                });
            }
            None => {}
        }
    }

    fn spawn_attempt(&mut self, generation: u64) {
        let Some(request) = self.target.clone() else {
            return;
        };
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }

        debug!("Connecting to {} (generation {})", request.url, generation);
        let connector = Arc::clone(&self.connector);
        let tx = self.internal_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            let msg = match connector.connect(request).await {
                Ok(link) => Internal::Opened { generation, link },
                Err(e) if e.is_unauthorized() => Internal::Rejected { generation },
                Err(e) => Internal::Failed {
                    generation,
                    error: e.to_string(),
                },
            };
            let _ = tx.send(msg);
        }));
    }

    fn spawn_reader(&self, generation: u64, mut stream: TextStream) -> JoinHandle<()> {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let msg = match item {
                    Ok(text) => Internal::Frame { generation, text },
                    Err(e) => Internal::Failed {
                        generation,
                        error: e.to_string(),
                    },
                };
                let failed = matches!(msg, Internal::Failed { .. });
                if tx.send(msg).is_err() || failed {
                    return;
                }
            }
            let _ = tx.send(Internal::Failed {
                generation,
                error: "connection closed".to_string(),
            });
        })
    }

    fn spawn_pinger(&self, generation: u64) -> Option<JoinHandle<()>> {
        let period = self.ping_interval?;
        let tx = self.internal_tx.clone();
        Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if tx.send(Internal::PingDue { generation }).is_err() {
                    return;
                }
            }
        }))
    }

    /// Abort helper tasks and close the link, if any
    async fn teardown(&mut self) {
        for handle in [self.reader.take(), self.pinger.take(), self.pending.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
        if let Some(sink) = self.sink.take() {
            close_sink(sink).await;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.update_tx.send(ConnectionUpdate {
            epoch: self.epoch,
            event,
        });
    }

    fn emit_status(&self) {
        let status = self.state.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            self.emit(ConnectionEvent::StatusChanged(status));
        }
    }
}

async fn close_sink(mut sink: FrameSink) {
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Err(e)) => debug!("Error closing link: {}", e),
        Err(_) => debug!("Timed out closing link"),
        Ok(Ok(())) => {}
    }
}
