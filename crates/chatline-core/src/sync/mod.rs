//! Live delivery over WebSocket
//!
//! Maintains the per-session socket to the chat backend and turns its frames
//! into typed envelopes.
//!
//! ## Protocol
//!
//! JSON text frames discriminated by `type`:
//! 1. Connect to `{ws_url}/ws/{user_id}` with a bearer token
//! 2. Send `message` and `typing` envelopes
//! 3. Receive `new_message`, `typing` and `receipt` envelopes
//!
//! ## Usage
//!
//! ```ignore
//! let (manager, mut updates) = ConnectionManager::spawn(WsConnector, options);
//! manager.connect(&session);
//! manager.send(ClientEnvelope::message("chat1", "hi", None));
//! ```

mod manager;
mod message;
mod state;
mod transport;

pub use manager::{ConnectionEvent, ConnectionManager, ConnectionOptions, ConnectionUpdate};
pub use message::{ClientEnvelope, ServerEnvelope};
pub use state::{ConnectionPolicy, ConnectionState, ConnectionStatus, Enqueued, Failure};
pub use transport::{
    ConnectRequest, Connector, Frame, FrameSink, Link, MemoryConnector, MemoryListener,
    MemoryPeer, TextStream, TransportError, WsConnector,
};
