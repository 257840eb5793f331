//! REST client implementation
//!
//! Thin wrapper over `reqwest` for the backend's auth, chat and user endpoints.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{ApiError, ApiResult};
use crate::config::Config;
use crate::models::{ChatPayload, MessagePayload, User};

/// Successful login or signup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// REST client for the chat backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the given base URL (e.g. `http://localhost:8000`)
    pub fn new(base_url: &str) -> Self {
        Self::with_http(base_url, reqwest::Client::new())
    }

    /// Create a client from configuration
    pub fn from_config(config: &Config) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|source| ApiError::Network {
                operation: "Building HTTP client",
                source,
            })?;
        Ok(Self::with_http(&config.api_url, http))
    }

    fn with_http(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Log in with email and password
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<AuthResponse> {
        const OP: &str = "Login";
        debug!("POST /api/auth/login email={}", email);

        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(|source| ApiError::Network { operation: OP, source })?;

        match response.status() {
            s if s.is_success() => decode(OP, response).await,
            StatusCode::UNAUTHORIZED => Err(ApiError::InvalidCredentials),
            status => Err(ApiError::Status { operation: OP, status }),
        }
    }

    /// Create an account
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> ApiResult<AuthResponse> {
        const OP: &str = "Signup";
        debug!("POST /api/auth/signup email={}", email);

        let response = self
            .http
            .post(self.url("/api/auth/signup"))
            .json(&SignupRequest {
                name,
                email,
                password,
            })
            .send()
            .await
            .map_err(|source| ApiError::Network { operation: OP, source })?;

        match response.status() {
            s if s.is_success() => decode(OP, response).await,
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => Err(ApiError::UserExists),
            status => Err(ApiError::Status { operation: OP, status }),
        }
    }

    /// Chats the user participates in
    pub async fn get_chats(&self, token: &str, user_id: &str) -> ApiResult<Vec<ChatPayload>> {
        self.get_json("Fetching chats", &format!("/api/chats/{}", user_id), token)
            .await
    }

    /// Message history of a chat
    pub async fn get_chat_messages(
        &self,
        token: &str,
        chat_id: &str,
    ) -> ApiResult<Vec<MessagePayload>> {
        self.get_json(
            "Fetching messages",
            &format!("/api/chats/{}/messages", chat_id),
            token,
        )
        .await
    }

    /// All registered users
    pub async fn get_users(&self, token: &str) -> ApiResult<Vec<User>> {
        self.get_json("Fetching users", "/api/users", token).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        token: &str,
    ) -> ApiResult<T> {
        debug!("GET {}", path);

        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| ApiError::Network { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            warn!("{} returned {}", path, status);
            return Err(ApiError::from_status(operation, status));
        }

        decode(operation, response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(operation: &'static str, response: Response) -> ApiResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|source| ApiError::Decode { operation, source })
}
