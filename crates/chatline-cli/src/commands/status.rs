//! Status command handler

use std::time::Duration;

use anyhow::Result;

use chatline_core::{ChatClient, Config, ConnectionStatus, User};

use crate::commands::auth::{self, Credentials};
use crate::output::{Output, OutputFormat};

/// How long to wait for the socket before reporting its status
const CONNECT_WAIT: Duration = Duration::from_secs(5);

/// Show endpoints and, when credentials are available, session and connection state
pub async fn show(config: &Config, credentials: &Credentials, output: &Output) -> Result<()> {
    let has_credentials = credentials.password.is_some()
        && (credentials.email.is_some() || config.email.is_some());

    let session = if has_credentials {
        match auth::open(config, credentials).await {
            Ok((client, user)) => {
                let status = wait_for_connection(&client).await;
                let chats = client.snapshot().conversations.len();
                client.logout();
                Some(Ok((user, status, chats)))
            }
            Err(e) => Some(Err(format!("{:#}", e))),
        }
    } else {
        None
    };

    match output.format {
        OutputFormat::Json => {
            let session_json = match &session {
                Some(Ok((user, status, chats))) => serde_json::json!({
                    "user": user,
                    "connection": status,
                    "chats": chats
                }),
                Some(Err(e)) => serde_json::json!({ "error": e }),
                None => serde_json::Value::Null,
            };
            println!(
                "{}",
                serde_json::json!({
                    "api_url": config.api_url,
                    "ws_url": config.ws_url,
                    "email": config.email,
                    "session": session_json
                })
            );
        }
        OutputFormat::Quiet => match &session {
            Some(Ok((_, status, _))) => println!("{}", status),
            Some(Err(_)) => println!("error"),
            None => println!("{}", ConnectionStatus::Disconnected),
        },
        OutputFormat::Human => {
            println!("Chatline Status");
            println!("===============");
            println!();
            println!("Server:");
            println!("  API:       {}", config.api_url);
            println!("  WebSocket: {}", config.ws_url);
            println!();
            println!("Session:");
            match &session {
                Some(Ok((user, status, chats))) => print_session(user, *status, *chats),
                Some(Err(e)) => println!("  Login failed: {}", e),
                None => {
                    println!("  Not logged in");
                    println!("  (pass --email and --password, or set CHATLINE_PASSWORD, to check)");
                }
            }
        }
    }

    Ok(())
}

fn print_session(user: &User, status: ConnectionStatus, chats: usize) {
    println!("  User:       {} <{}>", user.name, user.email);
    println!("  Connection: {}", status);
    println!("  Chats:      {}", chats);
}

async fn wait_for_connection(client: &ChatClient) -> ConnectionStatus {
    let mut status = client.subscribe_status();
    let _ = tokio::time::timeout(
        CONNECT_WAIT,
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await;
    client.status()
}
