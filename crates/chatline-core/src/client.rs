//! Chat client facade
//!
//! Wires the REST client, session store, connection manager, conversation
//! store and dispatch bus together and exposes the command surface a UI
//! drives. The conversation store is owned by a single sync-loop task; every
//! mutation, whether it comes from a UI command or from the socket, is
//! applied there in arrival order and published as a fresh snapshot.
//!
//! ## Usage
//!
//! ```ignore
//! let client = ChatClient::new(&config)?;
//! let mut events = client.subscribe();
//! client.login("alice@example.com", "password").await?;
//! client.send_message("chat1", "hi").await?;
//! while let Some(event) = events.recv().await { /* render */ }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiClient, ApiError, ApiResult, AuthResponse};
use crate::bus::{DispatchBus, SubscriberId, Subscription};
use crate::config::Config;
use crate::models::{Conversation, DeliveryStatus, Message, MessageKey, TypingIndicator, User};
use crate::session::{Session, SessionStore};
use crate::store::{Applied, ConversationStore, Reconciled, StoreError, StoreSnapshot};
use crate::sync::{
    ClientEnvelope, ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionStatus,
    ConnectionUpdate, Connector, ServerEnvelope, WsConnector,
};

/// Errors returned by client commands
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Not logged in.")]
    NotAuthenticated,

    #[error("Message is empty.")]
    EmptyMessage,

    #[error("Client has shut down.")]
    Stopped,
}

/// Events published to subscribers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The conversation store changed
    Snapshot(Arc<StoreSnapshot>),
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// A message from someone else (or another of our devices) arrived
    MessageReceived(Message),
    /// One of our optimistic sends was acknowledged by the server
    MessageConfirmed { temp_id: Uuid, message: Message },
    /// Someone started or stopped typing
    Typing(TypingIndicator),
    /// A message will never be sent; it is now marked failed
    SendFailed { chat_id: String, temp_id: Option<Uuid> },
    /// Automatic reconnection gave up
    ConnectionLost {
        attempts: u32,
        last_error: Option<String>,
    },
    /// The server rejected the session token; the session has been cleared
    AuthExpired,
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum CoreCommand {
    LoadConversations {
        conversations: Vec<Conversation>,
        reply: Reply<()>,
    },
    LoadMessages {
        chat_id: String,
        messages: Vec<Message>,
        reply: Reply<()>,
    },
    Optimistic {
        message: Message,
        reply: Reply<()>,
    },
    Select {
        chat_id: String,
        reply: Reply<()>,
    },
    Clear,
}

/// Realtime chat client
pub struct ChatClient {
    api: ApiClient,
    sessions: SessionStore,
    connection: ConnectionManager,
    bus: DispatchBus<ClientEvent>,
    snapshot_rx: watch::Receiver<Arc<StoreSnapshot>>,
    core_tx: mpsc::UnboundedSender<CoreCommand>,
}

impl ChatClient {
    /// Create a client for the configured backend
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let api = ApiClient::from_config(config)?;
        Ok(Self::with_parts(
            api,
            WsConnector,
            ConnectionOptions::from_config(config),
        ))
    }

    /// Create a client from explicit parts
    pub fn with_parts<C: Connector>(
        api: ApiClient,
        connector: C,
        options: ConnectionOptions,
    ) -> Self {
        let (connection, updates) = ConnectionManager::spawn(connector, options);
        let sessions = SessionStore::new(connection.clone());
        let bus = DispatchBus::new();
        let store = ConversationStore::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(store.snapshot());
        let (core_tx, core_rx) = mpsc::unbounded_channel();

        let sync = SyncLoop {
            published: store.version(),
            store,
            connection: connection.clone(),
            sessions: sessions.clone(),
            bus: bus.clone(),
            snapshot_tx,
        };
        tokio::spawn(sync.run(core_rx, updates));

        Self {
            api,
            sessions,
            connection,
            bus,
            snapshot_rx,
            core_tx,
        }
    }

    // ==================== Observation ====================

    pub fn subscribe(&self) -> Subscription<ClientEvent> {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Latest store snapshot
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.snapshot_rx.borrow())
    }

    /// Watch receiver that always holds the latest snapshot
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe_status()
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.current()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // ==================== Session ====================

    /// Log in, connect and load the chat list
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let auth = self.api.login(email, password).await?;
        Ok(self.start(auth).await)
    }

    /// Create an account, connect and load the chat list
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ClientError> {
        let auth = self.api.signup(name, email, password).await?;
        Ok(self.start(auth).await)
    }

    /// Adopt an existing session without going through login
    ///
    /// A session for a different user drops the previous user's state first.
    pub fn resume(&self, session: Session) {
        if self.sessions.user().is_some_and(|u| u.id != session.user.id) {
            self.logout();
        }
        self.sessions.set_session(session);
    }

    /// Drop the session, disconnect and clear local state
    pub fn logout(&self) {
        if self.sessions.clear_session().is_some() {
            info!("Logged out");
        }
        let _ = self.core_tx.send(CoreCommand::Clear);
    }

    async fn start(&self, auth: AuthResponse) -> User {
        let user = auth.user.clone();
        info!("Logged in as {} ({})", user.name, user.id);
        self.resume(Session {
            user: auth.user,
            token: auth.token,
        });
        if let Err(e) = self.refresh().await {
            warn!("Failed to load chats after login: {}", e);
        }
        user
    }

    // ==================== REST-backed commands ====================

    /// Reload the chat list
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let session = self.require_session()?;
        let chats = self
            .authed(self.api.get_chats(&session.token, &session.user.id).await)?;
        debug!("Loaded {} chats", chats.len());

        let conversations = chats.into_iter().map(Conversation::from).collect();
        self.request(|reply| CoreCommand::LoadConversations {
            conversations,
            reply,
        })
        .await
    }

    /// Fetch and merge the message history of a chat
    pub async fn load_history(&self, chat_id: &str) -> Result<(), ClientError> {
        let session = self.require_session()?;
        let history = self.authed(self.api.get_chat_messages(&session.token, chat_id).await)?;
        debug!("Loaded {} messages for {}", history.len(), chat_id);

        let messages = history.into_iter().map(Message::from).collect();
        self.request(|reply| CoreCommand::LoadMessages {
            chat_id: chat_id.to_string(),
            messages,
            reply,
        })
        .await
    }

    /// User directory
    pub async fn users(&self) -> Result<Vec<User>, ClientError> {
        let session = self.require_session()?;
        self.authed(self.api.get_users(&session.token).await)
    }

    // ==================== Live commands ====================

    /// Send a message optimistically
    ///
    /// The message shows up as pending right away; the returned temp id
    /// identifies it until the server confirms it.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<Uuid, ClientError> {
        let session = self.require_session()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let message = Message::optimistic(chat_id, &session.user, text);
        let Some(temp_id) = message.temp_id else {
            return Err(StoreError::NotOptimistic.into());
        };
        self.request(|reply| CoreCommand::Optimistic { message, reply })
            .await?;

        self.connection
            .send(ClientEnvelope::message(chat_id, text, Some(temp_id)));
        Ok(temp_id)
    }

    /// Tell the chat we are (not) typing; dropped unless connected
    pub fn send_typing(&self, chat_id: &str, is_typing: bool) -> Result<(), ClientError> {
        self.require_session()?;
        if self.connection.status() == ConnectionStatus::Connected {
            self.connection
                .send(ClientEnvelope::typing(chat_id, is_typing));
        }
        Ok(())
    }

    /// Make `chat_id` the active conversation
    pub async fn select_chat(&self, chat_id: &str) -> Result<(), ClientError> {
        self.request(|reply| CoreCommand::Select {
            chat_id: chat_id.to_string(),
            reply,
        })
        .await
    }

    /// Reconnect after `ConnectionLost`
    pub fn retry_connection(&self) {
        self.connection.retry();
    }

    // ==================== Helpers ====================

    fn require_session(&self) -> Result<Session, ClientError> {
        self.sessions.current().ok_or(ClientError::NotAuthenticated)
    }

    /// Clear the session when the server rejects the token
    fn authed<T>(&self, result: ApiResult<T>) -> Result<T, ClientError> {
        match result {
            Err(e) if e.is_auth_expired() => {
                warn!("Session token rejected, logging out");
                self.logout();
                self.bus.publish(ClientEvent::AuthExpired);
                Err(e.into())
            }
            other => other.map_err(ClientError::from),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> CoreCommand,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.core_tx
            .send(make(tx))
            .map_err(|_| ClientError::Stopped)?;
        rx.await
            .map_err(|_| ClientError::Stopped)?
            .map_err(ClientError::from)
    }
}

/// Single writer of the conversation store
struct SyncLoop {
    store: ConversationStore,
    published: u64,
    connection: ConnectionManager,
    sessions: SessionStore,
    bus: DispatchBus<ClientEvent>,
    snapshot_tx: watch::Sender<Arc<StoreSnapshot>>,
}

impl SyncLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<CoreCommand>,
        mut updates: mpsc::UnboundedReceiver<ConnectionUpdate>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(update) = updates.recv() => {
                    if self.connection.is_current(&update) {
                        self.handle_event(update.event);
                    } else {
                        debug!("Dropping update from a previous session");
                    }
                }
            }
            self.publish_snapshot();
        }
        debug!("Sync loop stopped");
    }

    fn handle_command(&mut self, cmd: CoreCommand) {
        match cmd {
            CoreCommand::LoadConversations {
                conversations,
                reply,
            } => {
                self.store.load_conversations(conversations);
                self.reply(reply, Ok(()));
            }
            CoreCommand::LoadMessages {
                chat_id,
                messages,
                reply,
            } => {
                let result = self.store.load_messages(&chat_id, messages);
                self.reply(reply, result);
            }
            CoreCommand::Optimistic { message, reply } => {
                let result = self.store.apply_optimistic_send(message);
                self.reply(reply, result);
            }
            CoreCommand::Select { chat_id, reply } => {
                let result = self.store.select_chat(&chat_id);
                self.reply(reply, result);
            }
            CoreCommand::Clear => self.store.clear(),
        }
    }

    /// Publish before replying so the caller sees its own change in `snapshot()`
    fn reply(&mut self, reply: Reply<()>, result: Result<(), StoreError>) {
        self.publish_snapshot();
        let _ = reply.send(result);
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StatusChanged(status) => {
                self.bus.publish(ClientEvent::StatusChanged(status));
            }
            ConnectionEvent::Frame(envelope) => self.handle_frame(envelope),
            ConnectionEvent::SendFailed(envelope) => {
                let ClientEnvelope::Message {
                    chat_id, client_id, ..
                } = envelope
                else {
                    return;
                };
                if let Some(temp_id) = client_id {
                    self.store
                        .update_status(&MessageKey::Temp(temp_id), DeliveryStatus::Failed);
                }
                self.bus
                    .publish(ClientEvent::SendFailed { chat_id, temp_id: client_id });
            }
            ConnectionEvent::ConnectionLost {
                attempts,
                last_error,
            } => {
                self.bus.publish(ClientEvent::ConnectionLost {
                    attempts,
                    last_error,
                });
            }
            ConnectionEvent::AuthExpired => {
                warn!("Session token rejected by the socket, logging out");
                self.sessions.clear_session();
                self.store.clear();
                self.bus.publish(ClientEvent::AuthExpired);
            }
        }
    }

    fn handle_frame(&mut self, envelope: ServerEnvelope) {
        match envelope {
            ServerEnvelope::NewMessage { message: payload } => {
                let client_id = payload.client_id;
                let message = Message::from(payload);
                let temp_id = client_id.or_else(|| self.own_echo(&message));

                let result = match temp_id {
                    Some(temp_id) => self
                        .store
                        .reconcile(temp_id, message.clone())
                        .map(|outcome| match outcome {
                            Reconciled::Replaced => {
                                Some(ClientEvent::MessageConfirmed { temp_id, message })
                            }
                            Reconciled::Appended => Some(ClientEvent::MessageReceived(message)),
                            Reconciled::AlreadyPresent => None,
                        }),
                    None => self
                        .store
                        .apply_inbound_message(message.clone())
                        .map(|applied| match applied {
                            Applied::Inserted => Some(ClientEvent::MessageReceived(message)),
                            Applied::Duplicate => None,
                        }),
                };

                match result {
                    Ok(Some(event)) => {
                        self.bus.publish(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping inbound message: {}", e),
                }
            }
            ServerEnvelope::Typing(indicator) => {
                if self.sessions.user().is_some_and(|me| me.id == indicator.user_id) {
                    return;
                }
                if self.store.set_typing(indicator.clone()) {
                    self.bus.publish(ClientEvent::Typing(indicator));
                }
            }
            ServerEnvelope::Receipt {
                message_id, status, ..
            } => {
                self.store
                    .update_status(&MessageKey::Server(message_id), status);
            }
            ServerEnvelope::Unknown => {}
        }
    }

    /// Temp id of our oldest pending send this echo corresponds to
    fn own_echo(&self, message: &Message) -> Option<Uuid> {
        let me = self.sessions.user()?;
        if message.sender_id != me.id {
            return None;
        }
        self.store
            .find_pending_echo(&message.chat_id, &message.sender_id, &message.body)
    }

    fn publish_snapshot(&mut self) {
        if self.store.version() == self.published {
            return;
        }
        self.published = self.store.version();
        let snapshot = self.store.snapshot();
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        self.bus.publish(ClientEvent::Snapshot(snapshot));
    }
}
