//! Chatline Core Library
//!
//! This crate provides the client-side sync core for Chatline, a realtime
//! messaging client: authentication against the chat backend, a per-session
//! WebSocket with automatic reconnection, optimistic sends and a single-writer
//! conversation store observed through immutable snapshots.
//!
//! # Architecture
//!
//! - **ConnectionManager**: actor that owns the socket, the outbound queue and
//!   all reconnect timers
//! - **ConversationStore**: canonical conversation/message state, mutated only
//!   by the client's sync loop
//! - **DispatchBus**: fan-out of [`ClientEvent`]s to any number of subscribers
//!
//! # Quick Start
//!
//! ```text
//! let client = ChatClient::new(&Config::load()?)?;
//! let mut events = client.subscribe();
//!
//! client.login("alice@example.com", "password").await?;
//! client.send_message("chat1", "hi").await?;
//!
//! while let Some(event) = events.recv().await {
//!     // render
//! }
//! ```
//!
//! # Modules
//!
//! - `client`: Facade tying everything together (main entry point)
//! - `models`: Users, conversations, messages and delivery status
//! - `store`: Conversation state store
//! - `sync`: WebSocket connection management and wire protocol
//! - `api`: REST client
//! - `session`: Current identity and token
//! - `bus`: Event fan-out
//! - `config`: Application configuration

pub mod api;
pub mod bus;
pub mod client;
pub mod config;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;

pub use api::{ApiClient, ApiError, ApiResult, AuthResponse};
pub use bus::{DispatchBus, SubscriberId, Subscription};
pub use client::{ChatClient, ClientError, ClientEvent};
pub use config::Config;
pub use models::{
    Conversation, ConversationKind, DeliveryStatus, Message, MessageKey, TypingIndicator, User,
};
pub use session::{Session, SessionStore};
pub use store::{ConversationStore, StoreError, StoreSnapshot};
pub use sync::{ConnectionManager, ConnectionOptions, ConnectionStatus};
