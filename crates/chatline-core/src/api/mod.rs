//! REST client for the chat backend
//!
//! Covers the request/response half of the backend: authentication, chat
//! listing, message history and the user directory. Live delivery goes
//! through [`crate::sync`].
//!
//! ## Endpoints
//!
//! - `POST /api/auth/login`, `POST /api/auth/signup`
//! - `GET /api/chats/{user_id}`, `GET /api/chats/{chat_id}/messages`
//! - `GET /api/users`
//!
//! Authenticated calls carry `Authorization: Bearer <token>`. A 401 maps to
//! [`ApiError::AuthExpired`].

mod client;
mod error;

pub use client::{ApiClient, AuthResponse};
pub use error::{ApiError, ApiResult};
