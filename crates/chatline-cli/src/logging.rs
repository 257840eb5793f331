//! Logging setup
//!
//! Logging is off unless `CHATLINE_LOG` is set to a level (e.g. `debug`).
//! Output goes to the configured `log_file`, or stderr when none is set.

use std::fs::File;

use chatline_core::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CHATLINE_LOG";

/// Install the global subscriber if `CHATLINE_LOG` is set
pub fn init(config: &Config) {
    let Ok(log_level) = std::env::var(LOG_ENV) else {
        return;
    };

    let env_filter = filter_for(&log_level);

    match &config.log_file {
        Some(log_path) => {
            let log_file = match File::create(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                    return;
                }
            };

            // Ignore error if already initialized
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();

            info!("Logging initialized to {:?}", log_path);
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

fn filter_for(log_level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "chatline_core={},chatline_cli={}",
        log_level, log_level
    ))
}
