//! REST error handling
//!
//! Provides typed errors for REST calls with user-presentable messages.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur during REST calls
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bearer token was rejected; the session must be re-established
    #[error("Session expired. Please log in again.")]
    AuthExpired,

    /// Login rejected
    #[error("Invalid email or password.")]
    InvalidCredentials,

    /// Signup rejected because the email is taken
    #[error("An account with this email already exists.")]
    UserExists,

    /// Unexpected HTTP status
    #[error("{operation} failed: server responded with {status}")]
    Status {
        operation: &'static str,
        status: StatusCode,
    },

    /// Network-level failure (DNS, refused, timeout)
    #[error("{operation} failed: could not reach server ({source})")]
    Network {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Response body could not be decoded
    #[error("{operation} failed: unexpected response from server ({source})")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    /// Classify a non-success HTTP status for an authenticated call
    pub fn from_status(operation: &'static str, status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::AuthExpired,
            _ => ApiError::Status { operation, status },
        }
    }

    /// Whether this error invalidates the current session
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }
}

/// Result type for REST calls
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_auth_expired() {
        let err = ApiError::from_status("Fetching chats", StatusCode::UNAUTHORIZED);
        assert!(err.is_auth_expired());
        assert!(err.to_string().contains("log in again"));
    }

    #[test]
    fn test_other_status_display() {
        let err = ApiError::from_status("Fetching chats", StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_auth_expired());

        let msg = err.to_string();
        assert!(msg.contains("Fetching chats failed"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_credential_messages() {
        assert_eq!(
            ApiError::InvalidCredentials.to_string(),
            "Invalid email or password."
        );
        assert!(ApiError::UserExists.to_string().contains("already exists"));
    }
}
