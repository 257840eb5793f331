//! Live handlers: send, listen and interactive chat

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use chatline_core::{ChatClient, ClientEvent, ConnectionStatus};

use crate::output::Output;

/// How long `send` waits for the server to acknowledge a message
const ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Send one message and wait until the server acknowledges it
pub async fn send(client: &ChatClient, chat_id: &str, text: &str, output: &Output) -> Result<()> {
    let mut events = client.subscribe();
    let temp_id = client
        .send_message(chat_id, text)
        .await
        .with_context(|| format!("Failed to send to chat '{}'", chat_id))?;

    let wait = async {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::MessageConfirmed { temp_id: id, message } if id == temp_id => {
                    return Ok(message);
                }
                ClientEvent::SendFailed {
                    temp_id: Some(id), ..
                } if id == temp_id => bail!("Message could not be sent"),
                ClientEvent::ConnectionLost { last_error, .. } => bail!(
                    "Connection lost before the message was acknowledged{}",
                    last_error.map(|e| format!(": {}", e)).unwrap_or_default()
                ),
                ClientEvent::AuthExpired => bail!("Session expired"),
                _ => {}
            }
        }
        bail!("Client stopped before the message was acknowledged")
    };

    let message = tokio::time::timeout(ACK_TIMEOUT, wait)
        .await
        .context("Timed out waiting for the server to acknowledge the message")??;

    output.success(&format!(
        "Sent to {} (id {})",
        chat_id,
        message.id.as_deref().unwrap_or("?")
    ));
    Ok(())
}

/// Stream live events until interrupted
pub async fn listen(client: &ChatClient, output: &Output) -> Result<()> {
    let mut events = client.subscribe();
    output.message("Listening for events (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                output.print_event(&event);
                if matches!(event, ClientEvent::AuthExpired) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.unsubscribe(events.id());
    Ok(())
}

/// A line typed in interactive mode
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Text(String),
    Select(String),
    Chats,
    Retry,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let mut parts = command.splitn(2, char::is_whitespace);
    match (parts.next(), parts.next().map(str::trim)) {
        (Some("quit" | "q" | "exit"), _) => Input::Quit,
        (Some("chats"), _) => Input::Chats,
        (Some("retry"), _) => Input::Retry,
        (Some("select"), Some(id)) if !id.is_empty() => Input::Select(id.to_string()),
        (Some(other), _) => Input::Unknown(other.to_string()),
        (None, _) => Input::Empty,
    }
}

async fn select(client: &ChatClient, chat_id: &str, output: &Output) -> Result<()> {
    client
        .select_chat(chat_id)
        .await
        .with_context(|| format!("Chat '{}' not found", chat_id))?;
    client
        .load_history(chat_id)
        .await
        .with_context(|| format!("Failed to load history for chat '{}'", chat_id))?;

    if let Some(chat) = client.snapshot().conversation(chat_id) {
        output.print_messages(chat);
    }
    Ok(())
}

/// Interactive chat: stdin lines are sent to the active chat
pub async fn chat(client: &ChatClient, initial: Option<String>, output: &Output) -> Result<()> {
    let mut events = client.subscribe();

    client.refresh().await.context("Failed to load chats")?;
    match initial {
        Some(chat_id) => select(client, &chat_id, output).await?,
        None => output.print_conversations(&client.snapshot()),
    }
    output.message(
        "Type a message and press Enter. Commands: /select <chat>, /chats, /retry, /quit",
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Chats => output.print_conversations(&client.snapshot()),
                    Input::Retry => {
                        if client.status() == ConnectionStatus::Disconnected {
                            output.message("Reconnecting...");
                        }
                        client.retry_connection();
                    }
                    Input::Select(chat_id) => {
                        if let Err(e) = select(client, &chat_id, output).await {
                            output.warn(&format!("{:#}", e));
                        }
                    }
                    Input::Text(text) => {
                        let Some(active) = client.snapshot().active_chat.clone() else {
                            output.warn("No chat selected. Use /select <chat>.");
                            continue;
                        };
                        if let Err(e) = client.send_message(&active, &text).await {
                            output.warn(&e.to_string());
                        }
                    }
                    Input::Unknown(command) => {
                        output.warn(&format!("Unknown command: /{}", command));
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                output.print_event(&event);
                if matches!(event, ClientEvent::AuthExpired) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.unsubscribe(events.id());
    Ok(())
}
