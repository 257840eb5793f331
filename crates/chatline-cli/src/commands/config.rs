//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use chatline_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "api_url, ws_url, email, reconnect_base_delay_ms, \
     max_reconnect_attempts, outbound_queue_capacity, ping_interval_secs, \
     request_timeout_secs, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "api_url": config.api_url,
                    "ws_url": config.ws_url,
                    "email": config.email,
                    "reconnect_base_delay_ms": config.reconnect_base_delay_ms,
                    "max_reconnect_attempts": config.max_reconnect_attempts,
                    "outbound_queue_capacity": config.outbound_queue_capacity,
                    "ping_interval_secs": config.ping_interval_secs,
                    "request_timeout_secs": config.request_timeout_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.api_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  api_url:                 {}", config.api_url);
            println!("  ws_url:                  {}", config.ws_url);
            println!(
                "  email:                   {}",
                config.email.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  reconnect_base_delay_ms: {}",
                config.reconnect_base_delay_ms
            );
            println!(
                "  max_reconnect_attempts:  {}",
                config.max_reconnect_attempts
            );
            println!(
                "  outbound_queue_capacity: {}",
                config.outbound_queue_capacity
            );
            println!("  ping_interval_secs:      {}", config.ping_interval_secs);
            println!("  request_timeout_secs:    {}", config.request_timeout_secs);
            println!(
                "  log_file:                {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "api_url" => config.api_url = value.trim_end_matches('/').to_string(),
        "ws_url" => config.ws_url = value.trim_end_matches('/').to_string(),
        "email" => config.email = optional(value),
        "reconnect_base_delay_ms" => {
            config.reconnect_base_delay_ms = parse_number(key, value)?;
        }
        "max_reconnect_attempts" => {
            config.max_reconnect_attempts = parse_number(key, value)?;
        }
        "outbound_queue_capacity" => {
            let capacity: usize = parse_number(key, value)?;
            if capacity == 0 {
                bail!("outbound_queue_capacity must be at least 1");
            }
            config.outbound_queue_capacity = capacity;
        }
        "ping_interval_secs" => config.ping_interval_secs = parse_number(key, value)?,
        "request_timeout_secs" => config.request_timeout_secs = parse_number(key, value)?,
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}. Expected a number.", key))
}
