//! API route handlers
//!
//! - `webhook`: build notification receiver (`POST /`)
//! - `health`: liveness and in-flight import listing

pub mod health;
pub mod webhook;

use crate::error::ServerError;

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
