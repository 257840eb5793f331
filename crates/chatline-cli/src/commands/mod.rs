//! Command handlers

pub mod auth;
pub mod chats;
pub mod config;
pub mod live;
pub mod status;
