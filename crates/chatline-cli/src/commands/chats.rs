//! Chat listing and history handlers

use anyhow::{Context, Result};

use chatline_core::ChatClient;

use crate::output::Output;

/// List registered users
pub async fn users(client: &ChatClient, output: &Output) -> Result<()> {
    let users = client.users().await.context("Failed to load users")?;
    output.print_users(&users);
    Ok(())
}

/// List the user's chats
pub async fn list(client: &ChatClient, output: &Output) -> Result<()> {
    client.refresh().await.context("Failed to load chats")?;
    output.print_conversations(&client.snapshot());
    Ok(())
}

/// Show the message history of a chat
pub async fn history(client: &ChatClient, chat_id: &str, output: &Output) -> Result<()> {
    client
        .load_history(chat_id)
        .await
        .with_context(|| format!("Failed to load history for chat '{}'", chat_id))?;

    let snapshot = client.snapshot();
    let chat = snapshot
        .conversation(chat_id)
        .with_context(|| format!("Chat '{}' not found", chat_id))?;
    output.print_messages(chat);
    Ok(())
}
