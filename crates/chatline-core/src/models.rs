//! Data models for Chatline
//!
//! Defines the core data structures: User, Conversation, Message and the
//! delivery status lattice. Wire payloads received from the backend are
//! converted into these types at the boundary.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique identifier (server-assigned)
    pub id: String,
    /// Display name
    pub name: String,
    /// Login email
    #[serde(default)]
    pub email: String,
    /// Avatar URL
    #[serde(default)]
    pub avatar: String,
    /// Whether the backend currently sees this user connected
    #[serde(default)]
    pub is_online: bool,
}

/// Kind of conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKind {
    /// One-to-one conversation (the backend calls it "private")
    #[serde(rename = "private", alias = "direct")]
    Direct,
    /// Multi-participant conversation
    #[serde(rename = "group")]
    Group,
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKind::Direct => write!(f, "direct"),
            ConversationKind::Group => write!(f, "group"),
        }
    }
}

/// Delivery status of a message
///
/// Transitions are monotonic: `Pending → Sent → Delivered → Read`, plus
/// `Pending → Failed`. Forward skips are legal, backward moves are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted locally, not yet acknowledged by the server
    Pending,
    /// Acknowledged by the server
    Sent,
    /// Delivered to the recipient's device
    Delivered,
    /// Read by the recipient
    Read,
    /// Could not be sent
    Failed,
}

impl DeliveryStatus {
    /// Position in the delivery lattice. `Failed` sits beside `Sent`.
    fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Sent | DeliveryStatus::Failed => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Read => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        match (self, next) {
            (DeliveryStatus::Failed, _) => false,
            (_, DeliveryStatus::Failed) => self == DeliveryStatus::Pending,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Addresses a message either by its server id or its optimistic temp id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Server(String),
    Temp(Uuid),
}

impl From<Uuid> for MessageKey {
    fn from(id: Uuid) -> Self {
        MessageKey::Temp(id)
    }
}

impl From<&str> for MessageKey {
    fn from(id: &str) -> Self {
        MessageKey::Server(id.to_string())
    }
}

/// A chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Server-assigned id, `None` until acknowledged
    pub id: Option<String>,
    /// Client-generated id for optimistic sends
    pub temp_id: Option<Uuid>,
    /// Conversation this message belongs to
    pub chat_id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Sender's display name at send time
    pub sender_name: String,
    /// Message text
    pub body: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Delivery status
    pub status: DeliveryStatus,
}

impl Message {
    /// Create a local, unacknowledged message with a fresh temp id
    pub fn optimistic(
        chat_id: impl Into<String>,
        sender: &User,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            temp_id: Some(Uuid::new_v4()),
            chat_id: chat_id.into(),
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            body: body.into(),
            created_at: Utc::now(),
            status: DeliveryStatus::Pending,
        }
    }

    /// Check whether this message is addressed by `key`
    pub fn matches(&self, key: &MessageKey) -> bool {
        match key {
            MessageKey::Server(id) => self.id.as_deref() == Some(id.as_str()),
            MessageKey::Temp(id) => self.temp_id == Some(*id),
        }
    }
}

impl From<MessagePayload> for Message {
    fn from(payload: MessagePayload) -> Self {
        Self {
            id: Some(payload.id),
            temp_id: None,
            chat_id: payload.chat_id,
            sender_id: payload.sender_id,
            sender_name: payload.sender_name,
            body: payload.text,
            created_at: payload.timestamp,
            status: DeliveryStatus::Sent,
        }
    }
}

/// A conversation with its ordered message sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    /// Unique identifier
    pub id: String,
    /// Direct or group
    pub kind: ConversationKind,
    /// Display name
    pub name: String,
    /// Avatar URL
    pub avatar: String,
    /// Participant user ids
    pub participants: BTreeSet<String>,
    /// When the conversation was created, if known
    pub created_at: Option<DateTime<Utc>>,
    /// Messages in arrival order
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(id: impl Into<String>, kind: ConversationKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            avatar: String::new(),
            participants: BTreeSet::new(),
            created_at: None,
            messages: Vec::new(),
        }
    }

    /// The most recent message, if any
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Find a message by key
    pub fn find(&self, key: &MessageKey) -> Option<&Message> {
        self.messages.iter().find(|m| m.matches(key))
    }

    /// Number of messages still awaiting acknowledgement
    pub fn pending_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.status == DeliveryStatus::Pending)
            .count()
    }
}

impl From<ChatPayload> for Conversation {
    fn from(payload: ChatPayload) -> Self {
        let mut messages = Vec::new();
        if let Some(last) = payload.last_message {
            messages.push(Message::from(last));
        }
        Self {
            id: payload.id,
            kind: payload.kind,
            name: payload.name,
            avatar: payload.avatar,
            participants: payload.participants.into_iter().collect(),
            created_at: payload.created_at,
            messages,
        }
    }
}

/// Someone started or stopped typing in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingIndicator {
    pub chat_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub is_typing: bool,
}

// ==================== Wire payloads ====================

/// Message as serialized by the backend (REST history and `new_message`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub text: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    /// Echo of the client's temp id, when the backend supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
}

/// Chat as serialized by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatPayload {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub last_message: Option<MessagePayload>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_message_type() -> String {
    "text".to_string()
}

/// Parse a backend timestamp
///
/// Accepts RFC 3339 as well as naive ISO 8601 (no offset), which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
