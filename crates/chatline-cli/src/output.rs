//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chatline_core::{
    ClientEvent, Conversation, DeliveryStatus, Message, StoreSnapshot, User,
};
use chrono::Local;
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print the signed-in user
    pub fn print_user(&self, user: &User) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:    {}", user.id);
                println!("Name:  {}", user.name);
                println!("Email: {}", user.email);
            }
            OutputFormat::Json => print_json(user),
            OutputFormat::Quiet => println!("{}", user.id),
        }
    }

    /// Print the user directory
    pub fn print_users(&self, users: &[User]) {
        match self.format {
            OutputFormat::Human => {
                if users.is_empty() {
                    println!("No users found.");
                    return;
                }
                for user in users {
                    let online = if user.is_online { "●" } else { " " };
                    println!(
                        "{} {} | {} | {}",
                        online,
                        truncate(&user.id, 12),
                        truncate(&user.name, 25),
                        user.email
                    );
                }
                println!("\n{} user(s)", users.len());
            }
            OutputFormat::Json => print_json(users),
            OutputFormat::Quiet => {
                for user in users {
                    println!("{}", user.id);
                }
            }
        }
    }

    /// Print the conversation list
    pub fn print_conversations(&self, snapshot: &StoreSnapshot) {
        let conversations = &snapshot.conversations;
        match self.format {
            OutputFormat::Human => {
                if conversations.is_empty() {
                    println!("No chats found.");
                    return;
                }
                for chat in conversations {
                    let active = snapshot.active_chat.as_deref() == Some(chat.id.as_str());
                    println!("{}", conversation_line(chat, active));
                }
                println!("\n{} chat(s)", conversations.len());
            }
            OutputFormat::Json => {
                let json_chats: Vec<_> = conversations
                    .iter()
                    .map(|chat| {
                        serde_json::json!({
                            "id": chat.id,
                            "name": chat.name,
                            "type": chat.kind.to_string(),
                            "participants": chat.participants,
                            "pending": chat.pending_count(),
                            "last_message": chat.last_message(),
                        })
                    })
                    .collect();
                print_json(&json_chats);
            }
            OutputFormat::Quiet => {
                for chat in conversations {
                    println!("{}", chat.id);
                }
            }
        }
    }

    /// Print the messages of a conversation
    pub fn print_messages(&self, chat: &Conversation) {
        match self.format {
            OutputFormat::Human => {
                println!("── {} ──", chat.name);
                if chat.messages.is_empty() {
                    println!("No messages yet.");
                    return;
                }
                for msg in &chat.messages {
                    println!("{}", format_message(msg));
                }
            }
            OutputFormat::Json => print_json(&chat.messages),
            OutputFormat::Quiet => {
                for msg in &chat.messages {
                    if let Some(id) = &msg.id {
                        println!("{}", id);
                    }
                }
            }
        }
    }

    /// Print a live event; snapshots are not printed
    pub fn print_event(&self, event: &ClientEvent) {
        let (kind, human, json) = match event {
            ClientEvent::Snapshot(_) => return,
            ClientEvent::StatusChanged(status) => (
                "status",
                format!("~ {}", status),
                serde_json::json!({ "status": status }),
            ),
            ClientEvent::MessageReceived(msg) => (
                "message",
                format!("[{}] {}", msg.chat_id, format_message(msg)),
                serde_json::json!({ "message": msg }),
            ),
            ClientEvent::MessageConfirmed { temp_id, message } => (
                "confirmed",
                format!("✓ sent ({})", message.id.as_deref().unwrap_or("?")),
                serde_json::json!({ "temp_id": temp_id, "message": message }),
            ),
            ClientEvent::Typing(t) => {
                let verb = if t.is_typing { "is typing" } else { "stopped typing" };
                (
                    "typing",
                    format!(
                        "[{}] {} {}...",
                        t.chat_id,
                        display_name(&t.user_name, &t.user_id),
                        verb
                    ),
                    serde_json::json!(t),
                )
            }
            ClientEvent::SendFailed { chat_id, temp_id } => (
                "send_failed",
                format!("✗ [{}] message could not be sent", chat_id),
                serde_json::json!({ "chat_id": chat_id, "temp_id": temp_id }),
            ),
            ClientEvent::ConnectionLost {
                attempts,
                last_error,
            } => (
                "connection_lost",
                format!(
                    "✗ Connection lost after {} attempts{}. Use /retry to reconnect.",
                    attempts,
                    last_error
                        .as_deref()
                        .map(|e| format!(" ({})", e))
                        .unwrap_or_default()
                ),
                serde_json::json!({ "attempts": attempts, "last_error": last_error }),
            ),
            ClientEvent::AuthExpired => (
                "auth_expired",
                "✗ Session expired. Please log in again.".to_string(),
                serde_json::json!({}),
            ),
        };

        match self.format {
            OutputFormat::Human => println!("{}", human),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "event": kind, "data": json }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

fn display_name<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    if name.is_empty() {
        fallback
    } else {
        name
    }
}

/// One-line rendering of a conversation for the chat list
fn conversation_line(chat: &Conversation, active: bool) -> String {
    let marker = if active { "*" } else { " " };
    let preview = chat
        .last_message()
        .map(|m| format!("{}: {}", m.sender_name, truncate_line(&m.body, 40)))
        .unwrap_or_default();
    let mut line = format!(
        "{} {} | {} ({}) | {}",
        marker,
        truncate(&chat.id, 12),
        truncate(&chat.name, 25),
        chat.kind,
        preview
    );
    match chat.pending_count() {
        0 => {}
        n => line.push_str(&format!(" [{} pending]", n)),
    }
    line
}

/// One-line rendering of a message: `HH:MM Name: body [status]`
fn format_message(msg: &Message) -> String {
    let marker = match msg.status {
        DeliveryStatus::Pending => " …",
        DeliveryStatus::Failed => " ✗",
        DeliveryStatus::Read => " ✓✓",
        DeliveryStatus::Sent | DeliveryStatus::Delivered => "",
    };
    format!(
        "{} {}: {}{}",
        msg.created_at.with_timezone(&Local).format("%H:%M"),
        display_name(&msg.sender_name, &msg.sender_id),
        msg.body,
        marker
    )
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
