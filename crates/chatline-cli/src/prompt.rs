//! Interactive prompts

use std::io::{self, Write};

use anyhow::{bail, Result};

/// Ask for a line of input
///
/// Fails in non-interactive mode (no TTY) so scripts get a clear error
/// instead of hanging on stdin.
pub fn ask(prompt: &str, missing_hint: &str) -> Result<String> {
    if !atty::is(atty::Stream::Stdin) {
        bail!("{}", missing_hint);
    }

    print!("{}: ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_string();
    if input.is_empty() {
        bail!("{}", missing_hint);
    }
    Ok(input)
}
