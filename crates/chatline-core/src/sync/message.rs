//! Wire protocol envelopes
//!
//! JSON text frames exchanged over the WebSocket, discriminated by `type`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeliveryStatus, MessagePayload, TypingIndicator};

/// Envelopes sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Post a message to a chat
    Message {
        chat_id: String,
        text: String,
        /// Temp id of the optimistic entry, echoed back by servers that support it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<Uuid>,
    },

    /// Typing indicator
    Typing { chat_id: String, is_typing: bool },
}

impl ClientEnvelope {
    /// Create a message envelope
    pub fn message(chat_id: &str, text: &str, client_id: Option<Uuid>) -> Self {
        ClientEnvelope::Message {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            client_id,
        }
    }

    /// Create a typing envelope
    pub fn typing(chat_id: &str, is_typing: bool) -> Self {
        ClientEnvelope::Typing {
            chat_id: chat_id.to_string(),
            is_typing,
        }
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Envelopes received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// A message was posted to one of our chats (including our own echo)
    NewMessage { message: MessagePayload },

    /// Someone started or stopped typing
    Typing(TypingIndicator),

    /// Delivery/read receipt for a message
    Receipt {
        chat_id: String,
        message_id: String,
        status: DeliveryStatus,
    },

    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl ServerEnvelope {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
