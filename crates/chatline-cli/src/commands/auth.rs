//! Login and signup handlers

use anyhow::{Context, Result};

use chatline_core::{ChatClient, Config, User};

use crate::output::Output;
use crate::prompt;

/// Credentials given on the command line or via environment
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Email from the flag, then config, then an interactive prompt
    pub fn email(&self, config: &Config) -> Result<String> {
        if let Some(email) = self.email.as_ref().or(config.email.as_ref()) {
            return Ok(email.clone());
        }
        prompt::ask(
            "Email",
            "No email given. Use --email, CHATLINE_EMAIL or `chatline config set email <address>`.",
        )
    }

    /// Password from the flag/env, then an interactive prompt
    pub fn password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        prompt::ask(
            "Password",
            "No password given. Use --password or CHATLINE_PASSWORD.",
        )
    }
}

/// Build a client and log in
pub async fn open(config: &Config, credentials: &Credentials) -> Result<(ChatClient, User)> {
    let email = credentials.email(config)?;
    let password = credentials.password()?;

    let client = ChatClient::new(config).context("Failed to create client")?;
    let user = client.login(&email, &password).await?;
    Ok((client, user))
}

/// Verify credentials and print the identity
pub async fn login(config: &Config, credentials: &Credentials, output: &Output) -> Result<()> {
    let (client, user) = open(config, credentials).await?;
    output.print_user(&user);
    client.logout();
    Ok(())
}

/// Create an account and print the identity
pub async fn signup(
    config: &Config,
    credentials: &Credentials,
    name: &str,
    output: &Output,
) -> Result<()> {
    let email = credentials.email(config)?;
    let password = credentials.password()?;

    let client = ChatClient::new(config).context("Failed to create client")?;
    let user = client.signup(name, &email, &password).await?;
    output.success(&format!("Account created for {}", user.email));
    output.print_user(&user);
    client.logout();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_prefers_flag_over_config() {
        let config = Config {
            email: Some("config@example.com".to_string()),
            ..Config::default()
        };
        let creds = Credentials {
            email: Some("flag@example.com".to_string()),
            password: None,
        };
        assert_eq!(creds.email(&config).unwrap(), "flag@example.com");

        let creds = Credentials::default();
        assert_eq!(creds.email(&config).unwrap(), "config@example.com");
    }

    #[test]
    fn test_password_from_flag() {
        let creds = Credentials {
            email: None,
            password: Some("secret".to_string()),
        };
        assert_eq!(creds.password().unwrap(), "secret");
    }
}
