//! Error types for delivery channels.

use thiserror::Error;

/// Errors that can occur when delivering a notification.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The endpoint rejected the delivery
    #[error("Endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Send did not complete within the per-attempt timeout
    #[error("Delivery timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Other error
    #[error("{0}")]
    Other(String),
}
