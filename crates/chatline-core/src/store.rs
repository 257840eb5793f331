//! Conversation state store
//!
//! The `ConversationStore` is the canonical in-memory representation of the
//! user's chats and their messages. It is mutated only through the operations
//! below and read through immutable [`StoreSnapshot`]s.
//!
//! ## Invariants
//!
//! - Conversation ids are unique.
//! - Within a conversation a server message id appears at most once.
//! - Message sequences are append-only, except for delivery-status updates
//!   and the in-place replacement done by [`ConversationStore::reconcile`].
//! - Delivery status only moves forward (see [`DeliveryStatus`]).
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = ConversationStore::new();
//! store.load_conversations(chats);
//!
//! let local = Message::optimistic("chat1", &me, "hi");
//! let temp_id = local.temp_id.unwrap();
//! store.apply_optimistic_send(local)?;
//!
//! // later, when the server echoes it back
//! store.reconcile(temp_id, confirmed);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Conversation, ConversationKind, DeliveryStatus, Message, MessageKey, TypingIndicator,
};

/// Errors returned by store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Inbound messages must carry a server-assigned id
    #[error("inbound message has no server id")]
    MissingServerId,

    /// Optimistic sends must carry a temp id and be pending
    #[error("optimistic message must be pending and carry a temp id")]
    NotOptimistic,

    /// The conversation is not known to the store
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
}

/// Result of applying an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Message was new and has been appended
    Inserted,
    /// A message with the same id already exists; nothing changed
    Duplicate,
}

/// Result of reconciling an optimistic send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The temp entry was replaced in place
    Replaced,
    /// No temp entry existed, the server message was appended
    Appended,
    /// The server message was already present; any temp entry was dropped
    AlreadyPresent,
}

/// Immutable view of the store, shared with subscribers
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSnapshot {
    /// Monotonic counter, bumped on every mutation
    pub version: u64,
    /// Conversations in load order
    pub conversations: Vec<Conversation>,
    /// Currently selected conversation
    pub active_chat: Option<String>,
    /// Conversation id → names of users currently typing
    pub typing: BTreeMap<String, Vec<String>>,
}

impl StoreSnapshot {
    /// Look up a conversation by id
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// The selected conversation, if any
    pub fn active(&self) -> Option<&Conversation> {
        self.active_chat
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    /// Find a message anywhere in the snapshot
    pub fn find_message(&self, key: &MessageKey) -> Option<&Message> {
        self.conversations.iter().find_map(|c| c.find(key))
    }
}

#[derive(Debug)]
struct Entry {
    conversation: Conversation,
    /// Server ids present in `conversation.messages`
    seen: HashSet<String>,
    /// user id → user name
    typing: BTreeMap<String, String>,
}

impl Entry {
    fn new(conversation: Conversation) -> Self {
        let seen = conversation
            .messages
            .iter()
            .filter_map(|m| m.id.clone())
            .collect();
        Self {
            conversation,
            seen,
            typing: BTreeMap::new(),
        }
    }

    fn position(&self, key: &MessageKey) -> Option<usize> {
        self.conversation.messages.iter().position(|m| m.matches(key))
    }
}

/// Canonical store of conversations and messages
#[derive(Debug, Default)]
pub struct ConversationStore {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    active_chat: Option<String>,
    version: u64,
}

impl ConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutations applied so far
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of conversations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no conversations
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build an immutable snapshot of the current state
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        let typing: BTreeMap<String, Vec<String>> = self
            .entries
            .iter()
            .filter(|e| !e.typing.is_empty())
            .map(|e| {
                (
                    e.conversation.id.clone(),
                    e.typing.values().cloned().collect(),
                )
            })
            .collect();

        Arc::new(StoreSnapshot {
            version: self.version,
            conversations: self.entries.iter().map(|e| e.conversation.clone()).collect(),
            active_chat: self.active_chat.clone(),
            typing,
        })
    }

    // ==================== Loading ====================

    /// Replace the conversation list with a fresh listing
    ///
    /// Messages already held for a conversation that is still listed are kept
    /// and merged with whatever the listing carries.
    pub fn load_conversations(&mut self, conversations: Vec<Conversation>) {
        let mut previous: HashMap<String, Entry> = self
            .entries
            .drain(..)
            .map(|e| (e.conversation.id.clone(), e))
            .collect();
        self.index.clear();

        for conversation in conversations {
            if self.index.contains_key(&conversation.id) {
                continue;
            }
            let entry = match previous.remove(&conversation.id) {
                Some(mut old) => {
                    let mut incoming = conversation;
                    let listed = std::mem::replace(
                        &mut incoming.messages,
                        std::mem::take(&mut old.conversation.messages),
                    );
                    old.conversation = incoming;
                    for msg in listed {
                        push_unique(&mut old, msg);
                    }
                    old
                }
                None => Entry::new(conversation),
            };
            self.index.insert(entry.conversation.id.clone(), self.entries.len());
            self.entries.push(entry);
        }

        let stale = self
            .active_chat
            .as_ref()
            .is_some_and(|id| !self.index.contains_key(id));
        if stale {
            self.active_chat = None;
        }
        self.bump();
    }

    /// Merge message history fetched over REST into a conversation
    ///
    /// History comes first, in server order; messages held locally that the
    /// history does not contain (live arrivals, optimistic sends) follow in
    /// their existing order.
    pub fn load_messages(
        &mut self,
        chat_id: &str,
        history: Vec<Message>,
    ) -> Result<(), StoreError> {
        let pos = *self
            .index
            .get(chat_id)
            .ok_or_else(|| StoreError::UnknownConversation(chat_id.to_string()))?;
        let entry = &mut self.entries[pos];

        let mut merged = Vec::with_capacity(history.len() + entry.conversation.messages.len());
        let mut seen = HashSet::new();
        for msg in history {
            let Some(id) = msg.id.clone() else {
                continue;
            };
            if msg.chat_id == chat_id && seen.insert(id) {
                merged.push(msg);
            }
        }
        for msg in entry.conversation.messages.drain(..) {
            match &msg.id {
                Some(id) if seen.contains(id) => {}
                Some(id) => {
                    seen.insert(id.clone());
                    merged.push(msg);
                }
                None => merged.push(msg),
            }
        }

        entry.conversation.messages = merged;
        entry.seen = seen;
        self.bump();
        Ok(())
    }

    // ==================== Message operations ====================

    /// Insert a server-delivered message
    ///
    /// Idempotent by server id. A message for an unknown conversation creates
    /// a stub conversation so nothing is lost.
    pub fn apply_inbound_message(&mut self, msg: Message) -> Result<Applied, StoreError> {
        let Some(id) = msg.id.clone() else {
            return Err(StoreError::MissingServerId);
        };

        let pos = self.ensure_conversation(&msg.chat_id, &msg.sender_name);
        let entry = &mut self.entries[pos];
        if entry.seen.contains(&id) {
            debug!("Ignoring duplicate message {}", id);
            return Ok(Applied::Duplicate);
        }

        entry.typing.remove(&msg.sender_id);
        push_unique(entry, msg);
        self.bump();
        Ok(Applied::Inserted)
    }

    /// Append a locally composed, unacknowledged message
    pub fn apply_optimistic_send(&mut self, msg: Message) -> Result<(), StoreError> {
        if msg.temp_id.is_none() || msg.id.is_some() || msg.status != DeliveryStatus::Pending {
            return Err(StoreError::NotOptimistic);
        }
        let pos = *self
            .index
            .get(&msg.chat_id)
            .ok_or_else(|| StoreError::UnknownConversation(msg.chat_id.clone()))?;

        self.entries[pos].conversation.messages.push(msg);
        self.bump();
        Ok(())
    }

    /// Replace an optimistic entry with the server-confirmed message
    ///
    /// The server message ends up present exactly once whether or not the
    /// temp entry is still around.
    pub fn reconcile(
        &mut self,
        temp_id: Uuid,
        server_msg: Message,
    ) -> Result<Reconciled, StoreError> {
        let Some(id) = server_msg.id.clone() else {
            return Err(StoreError::MissingServerId);
        };

        let pos = self.ensure_conversation(&server_msg.chat_id, &server_msg.sender_name);
        let entry = &mut self.entries[pos];
        let temp_pos = entry.position(&MessageKey::Temp(temp_id));

        let outcome = if entry.seen.contains(&id) {
            if let Some(p) = temp_pos {
                entry.conversation.messages.remove(p);
            }
            Reconciled::AlreadyPresent
        } else if let Some(p) = temp_pos {
            let existing = &entry.conversation.messages[p];
            let status = if existing.status == DeliveryStatus::Failed
                || existing.status.can_transition_to(server_msg.status)
            {
                server_msg.status
            } else {
                existing.status
            };
            entry.conversation.messages[p] = Message {
                temp_id: Some(temp_id),
                status,
                ..server_msg
            };
            entry.seen.insert(id);
            Reconciled::Replaced
        } else {
            push_unique(entry, server_msg);
            Reconciled::Appended
        };

        self.bump();
        Ok(outcome)
    }

    /// Move a message's delivery status forward
    ///
    /// Returns `false` when the message is unknown or the transition would
    /// regress; neither is an error.
    pub fn update_status(&mut self, key: &MessageKey, status: DeliveryStatus) -> bool {
        let Some(msg) = self
            .entries
            .iter_mut()
            .flat_map(|e| e.conversation.messages.iter_mut())
            .find(|m| m.matches(key))
        else {
            return false;
        };

        if !msg.status.can_transition_to(status) {
            debug!("Ignoring status {} -> {} for {:?}", msg.status, status, key);
            return false;
        }
        msg.status = status;
        self.bump();
        true
    }

    /// Find the oldest pending optimistic message matching a server echo
    ///
    /// Used when the backend echoes a sent message without the client id.
    pub fn find_pending_echo(&self, chat_id: &str, sender_id: &str, body: &str) -> Option<Uuid> {
        let pos = *self.index.get(chat_id)?;
        self.entries[pos]
            .conversation
            .messages
            .iter()
            .find(|m| {
                m.id.is_none()
                    && m.status == DeliveryStatus::Pending
                    && m.sender_id == sender_id
                    && m.body == body
            })
            .and_then(|m| m.temp_id)
    }

    // ==================== UI state ====================

    /// Select the active conversation
    pub fn select_chat(&mut self, chat_id: &str) -> Result<(), StoreError> {
        if !self.index.contains_key(chat_id) {
            return Err(StoreError::UnknownConversation(chat_id.to_string()));
        }
        if self.active_chat.as_deref() != Some(chat_id) {
            self.active_chat = Some(chat_id.to_string());
            self.bump();
        }
        Ok(())
    }

    /// Currently selected conversation id
    pub fn active_chat(&self) -> Option<&str> {
        self.active_chat.as_deref()
    }

    /// Record a typing indicator; returns whether anything changed
    pub fn set_typing(&mut self, indicator: TypingIndicator) -> bool {
        let Some(&pos) = self.index.get(&indicator.chat_id) else {
            return false;
        };
        let typing = &mut self.entries[pos].typing;
        let changed = if indicator.is_typing {
            let name = if indicator.user_name.is_empty() {
                indicator.user_id.clone()
            } else {
                indicator.user_name
            };
            typing.insert(indicator.user_id, name.clone()) != Some(name)
        } else {
            typing.remove(&indicator.user_id).is_some()
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Drop everything (logout)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.active_chat = None;
        self.bump();
    }

    fn ensure_conversation(&mut self, chat_id: &str, name_hint: &str) -> usize {
        if let Some(&pos) = self.index.get(chat_id) {
            return pos;
        }
        debug!("Creating stub conversation for {}", chat_id);
        let name = if name_hint.is_empty() { chat_id } else { name_hint };
        let pos = self.entries.len();
        self.entries.push(Entry::new(Conversation::new(
            chat_id,
            ConversationKind::Direct,
            name,
        )));
        self.index.insert(chat_id.to_string(), pos);
        pos
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

fn push_unique(entry: &mut Entry, msg: Message) {
    match &msg.id {
        Some(id) if !entry.seen.insert(id.clone()) => {}
        _ => entry.conversation.messages.push(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use chrono::Utc;

    fn me() -> User {
        User {
            id: "user1".to_string(),
            name: "Alice Johnson".to_string(),
            email: "alice@example.com".to_string(),
            avatar: String::new(),
            is_online: true,
        }
    }

    fn server_msg(id: &str, chat_id: &str, body: &str) -> Message {
        Message {
            id: Some(id.to_string()),
            temp_id: None,
            chat_id: chat_id.to_string(),
            sender_id: "user2".to_string(),
            sender_name: "Bob Smith".to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
        }
    }

    fn store_with_chats() -> ConversationStore {
        let mut store = ConversationStore::new();
        store.load_conversations(vec![
            Conversation::new("chat1", ConversationKind::Direct, "Bob Smith"),
            Conversation::new("chat2", ConversationKind::Group, "Team Project"),
        ]);
        store
    }

    fn ids(store: &ConversationStore, chat_id: &str) -> Vec<Option<String>> {
        store
            .snapshot()
            .conversation(chat_id)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.id.clone())
            .collect()
    }

    #[test]
    fn test_inbound_dedup_by_id() {
        let mut store = store_with_chats();

        let sequence = ["a", "b", "a", "c", "b", "a"];
        for id in sequence {
            store.apply_inbound_message(server_msg(id, "chat1", id)).unwrap();
        }

        let snapshot = store.snapshot();
        let conv = snapshot.conversation("chat1").unwrap();
        assert_eq!(conv.messages.len(), 3);
        for id in ["a", "b", "c"] {
            let count = conv
                .messages
                .iter()
                .filter(|m| m.id.as_deref() == Some(id))
                .count();
            assert_eq!(count, 1, "id {} should appear once", id);
        }
    }

    #[test]
    fn test_duplicate_reports_no_change() {
        let mut store = store_with_chats();
        assert_eq!(
            store.apply_inbound_message(server_msg("m1", "chat1", "x")).unwrap(),
            Applied::Inserted
        );
        let version = store.version();
        assert_eq!(
            store.apply_inbound_message(server_msg("m1", "chat1", "x")).unwrap(),
            Applied::Duplicate
        );
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_inbound_without_id_rejected() {
        let mut store = store_with_chats();
        let mut msg = server_msg("m1", "chat1", "x");
        msg.id = None;
        assert_eq!(
            store.apply_inbound_message(msg),
            Err(StoreError::MissingServerId)
        );
    }

    #[test]
    fn test_inbound_unknown_chat_creates_stub() {
        let mut store = store_with_chats();
        store
            .apply_inbound_message(server_msg("m1", "chat9", "hello"))
            .unwrap();

        let snapshot = store.snapshot();
        let conv = snapshot.conversation("chat9").unwrap();
        assert_eq!(conv.name, "Bob Smith");
        assert_eq!(conv.messages.len(), 1);
    }

    #[test]
    fn test_optimistic_send_then_reconcile_in_place() {
        let mut store = store_with_chats();
        store.apply_inbound_message(server_msg("m1", "chat1", "before")).unwrap();

        let local = Message::optimistic("chat1", &me(), "hi");
        let temp_id = local.temp_id.unwrap();
        store.apply_optimistic_send(local).unwrap();
        store.apply_inbound_message(server_msg("m2", "chat1", "after")).unwrap();

        let mut confirmed = server_msg("42", "chat1", "hi");
        confirmed.sender_id = "user1".to_string();
        assert_eq!(store.reconcile(temp_id, confirmed).unwrap(), Reconciled::Replaced);

        assert_eq!(
            ids(&store, "chat1"),
            vec![
                Some("m1".to_string()),
                Some("42".to_string()),
                Some("m2".to_string())
            ]
        );
        let snapshot = store.snapshot();
        let msg = snapshot.find_message(&MessageKey::from("42")).unwrap();
        assert_eq!(msg.status, DeliveryStatus::Sent);
        assert_eq!(msg.temp_id, Some(temp_id));
    }

    #[test]
    fn test_reconcile_without_temp_appends() {
        let mut store = store_with_chats();
        let outcome = store
            .reconcile(Uuid::new_v4(), server_msg("42", "chat1", "hi"))
            .unwrap();
        assert_eq!(outcome, Reconciled::Appended);
        assert_eq!(ids(&store, "chat1"), vec![Some("42".to_string())]);
    }

    #[test]
    fn test_reconcile_exactly_once() {
        let mut store = store_with_chats();
        let local = Message::optimistic("chat1", &me(), "hi");
        let temp_id = local.temp_id.unwrap();
        store.apply_optimistic_send(local).unwrap();

        // Echo arrives as a plain inbound first, then the ack.
        store.apply_inbound_message(server_msg("42", "chat1", "hi")).unwrap();
        assert_eq!(
            store.reconcile(temp_id, server_msg("42", "chat1", "hi")).unwrap(),
            Reconciled::AlreadyPresent
        );
        // And a second reconcile of the same pair is harmless.
        store.reconcile(temp_id, server_msg("42", "chat1", "hi")).unwrap();

        assert_eq!(ids(&store, "chat1"), vec![Some("42".to_string())]);
    }

    #[test]
    fn test_optimistic_send_validation() {
        let mut store = store_with_chats();

        let confirmed = server_msg("m1", "chat1", "x");
        assert_eq!(
            store.apply_optimistic_send(confirmed),
            Err(StoreError::NotOptimistic)
        );

        let stray = Message::optimistic("nope", &me(), "x");
        assert_eq!(
            store.apply_optimistic_send(stray),
            Err(StoreError::UnknownConversation("nope".to_string()))
        );
    }

    #[test]
    fn test_status_never_regresses() {
        let mut store = store_with_chats();
        store.apply_inbound_message(server_msg("m1", "chat1", "x")).unwrap();
        let key = MessageKey::from("m1");

        let attempts = [
            DeliveryStatus::Read,
            DeliveryStatus::Delivered,
            DeliveryStatus::Sent,
            DeliveryStatus::Failed,
            DeliveryStatus::Pending,
        ];
        let mut observed = vec![DeliveryStatus::Sent];
        for status in attempts {
            if store.update_status(&key, status) {
                observed.push(status);
            }
        }

        assert_eq!(observed, vec![DeliveryStatus::Sent, DeliveryStatus::Read]);
        assert_eq!(
            store.snapshot().find_message(&key).unwrap().status,
            DeliveryStatus::Read
        );
    }

    #[test]
    fn test_pending_can_fail() {
        let mut store = store_with_chats();
        let local = Message::optimistic("chat1", &me(), "hi");
        let key = MessageKey::Temp(local.temp_id.unwrap());
        store.apply_optimistic_send(local).unwrap();

        assert!(store.update_status(&key, DeliveryStatus::Failed));
        assert!(!store.update_status(&key, DeliveryStatus::Sent));
        assert!(!store.update_status(&MessageKey::from("missing"), DeliveryStatus::Read));
    }

    #[test]
    fn test_find_pending_echo_picks_oldest() {
        let mut store = store_with_chats();
        let first = Message::optimistic("chat1", &me(), "same");
        let second = Message::optimistic("chat1", &me(), "same");
        let first_id = first.temp_id.unwrap();
        store.apply_optimistic_send(first).unwrap();
        store.apply_optimistic_send(second).unwrap();

        assert_eq!(store.find_pending_echo("chat1", "user1", "same"), Some(first_id));
        assert_eq!(store.find_pending_echo("chat1", "user2", "same"), None);
        assert_eq!(store.find_pending_echo("chat1", "user1", "other"), None);
    }

    #[test]
    fn test_load_messages_merges_history() {
        let mut store = store_with_chats();
        store.apply_inbound_message(server_msg("live", "chat1", "live")).unwrap();
        let local = Message::optimistic("chat1", &me(), "pending");
        store.apply_optimistic_send(local).unwrap();

        store
            .load_messages(
                "chat1",
                vec![
                    server_msg("h1", "chat1", "old"),
                    server_msg("live", "chat1", "live"),
                    server_msg("h1", "chat1", "old"),
                ],
            )
            .unwrap();

        assert_eq!(
            ids(&store, "chat1"),
            vec![Some("h1".to_string()), Some("live".to_string()), None]
        );
        assert!(store.load_messages("nope", Vec::new()).is_err());
    }

    #[test]
    fn test_reload_conversations_keeps_messages() {
        let mut store = store_with_chats();
        store.apply_inbound_message(server_msg("m1", "chat1", "x")).unwrap();
        store.select_chat("chat2").unwrap();

        let mut listed = Conversation::new("chat1", ConversationKind::Direct, "Bob S.");
        listed.messages.push(server_msg("m1", "chat1", "x"));
        listed.messages.push(server_msg("m2", "chat1", "y"));
        store.load_conversations(vec![listed]);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.conversations.len(), 1);
        let conv = snapshot.conversation("chat1").unwrap();
        assert_eq!(conv.name, "Bob S.");
        assert_eq!(conv.messages.len(), 2);
        // chat2 vanished, so the selection is dropped
        assert!(snapshot.active_chat.is_none());
    }

    #[test]
    fn test_select_chat() {
        let mut store = store_with_chats();
        store.select_chat("chat1").unwrap();
        assert_eq!(store.active_chat(), Some("chat1"));
        assert_eq!(store.snapshot().active().unwrap().name, "Bob Smith");
        assert!(store.select_chat("missing").is_err());
    }

    #[test]
    fn test_typing_indicators() {
        let mut store = store_with_chats();
        let typing = TypingIndicator {
            chat_id: "chat2".to_string(),
            user_id: "user2".to_string(),
            user_name: "Bob Smith".to_string(),
            is_typing: true,
        };
        assert!(store.set_typing(typing.clone()));
        assert!(!store.set_typing(typing.clone()));
        assert_eq!(
            store.snapshot().typing.get("chat2"),
            Some(&vec!["Bob Smith".to_string()])
        );

        // A message from the typist clears the indicator
        let mut msg = server_msg("m1", "chat2", "done");
        msg.sender_id = "user2".to_string();
        store.apply_inbound_message(msg).unwrap();
        assert!(store.snapshot().typing.is_empty());

        assert!(!store.set_typing(TypingIndicator {
            is_typing: false,
            ..typing
        }));
    }

    #[test]
    fn test_clear() {
        let mut store = store_with_chats();
        store.select_chat("chat1").unwrap();
        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshot().active_chat.is_none());
    }
}
