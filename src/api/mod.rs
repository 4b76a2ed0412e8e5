//! Downstream resource API clients

mod mail;

pub use mail::MailClient;

use thiserror::Error;

/// Downstream call failure.
///
/// The action runner treats every variant the same way: "no usable result",
/// the signal that the access token has likely expired and a refresh should
/// be attempted before retrying once.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// Non-success status from the resource API.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Well-formed response with nothing in it.
    #[error("response contained no items")]
    Empty,
}
