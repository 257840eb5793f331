//! Chatline CLI
//!
//! Command-line interface for Chatline - realtime messaging from the terminal.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chatline_core::Config;

mod commands;
mod logging;
mod output;
mod prompt;

use commands::auth::Credentials;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "chatline")]
#[command(about = "Chatline - realtime messaging client")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file
    #[arg(long, global = true, env = "CHATLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Login email (defaults to the configured email)
    #[arg(long, global = true)]
    email: Option<String>,

    /// Login password
    #[arg(long, global = true, env = "CHATLINE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify credentials and show the signed-in user
    Login,
    /// Create an account
    Signup {
        /// Display name
        #[arg(short, long)]
        name: String,
    },
    /// List registered users
    Users,
    /// List your chats
    #[command(alias = "ls")]
    Chats,
    /// Show the message history of a chat
    History {
        /// Chat ID
        chat: String,
    },
    /// Send a message and wait for the server to acknowledge it
    Send {
        /// Chat ID
        chat: String,
        /// Message text
        text: String,
    },
    /// Stream live events (messages, typing, connection changes)
    Listen,
    /// Interactive chat session
    Chat {
        /// Chat to open
        chat: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show server, session and connection status
    Status,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, ws_url, email, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work on the file itself, before anything else is set up
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config);

    let credentials = Credentials {
        email: cli.email.clone(),
        password: cli.password.clone(),
    };

    match cli.command {
        Commands::Config { .. } => Ok(()), // Handled above
        Commands::Login => commands::auth::login(&config, &credentials, &output).await,
        Commands::Signup { name } => {
            commands::auth::signup(&config, &credentials, &name, &output).await
        }
        Commands::Status => commands::status::show(&config, &credentials, &output).await,
        Commands::Users => {
            let (client, _) = commands::auth::open(&config, &credentials).await?;
            commands::chats::users(&client, &output).await
        }
        Commands::Chats => {
            let (client, _) = commands::auth::open(&config, &credentials).await?;
            commands::chats::list(&client, &output).await
        }
        Commands::History { chat } => {
            let (client, _) = commands::auth::open(&config, &credentials).await?;
            commands::chats::history(&client, &chat, &output).await
        }
        Commands::Send { chat, text } => {
            let (client, _) = commands::auth::open(&config, &credentials).await?;
            commands::live::send(&client, &chat, &text, &output).await
        }
        Commands::Listen => {
            let (client, user) = commands::auth::open(&config, &credentials).await?;
            output.message(&format!("Signed in as {}", user.name));
            commands::live::listen(&client, &output).await
        }
        Commands::Chat { chat } => {
            let (client, user) = commands::auth::open(&config, &credentials).await?;
            output.message(&format!("Signed in as {}", user.name));
            let result = commands::live::chat(&client, chat, &output).await;
            client.logout();
            result
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}
