//! # Realtime Errors
//!
//! Error types for the subscription multiplexer.
//!
//! None of these ever reach a subscribing component synchronously: the
//! manager logs and degrades to "no live updates" instead of raising.

use thiserror::Error;

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Realtime errors
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Channel key failed validation
    #[error("Invalid channel key: {0}")]
    InvalidChannelKey(String),

    /// Subscription descriptor failed validation
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Upstream channel could not be opened
    #[error("Failed to open channel: {0}")]
    ChannelOpen(String),

    /// Transport-level connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed wire frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Per-channel listener cap reached
    #[error("Too many listeners (max: {0})")]
    TooManyListeners(usize),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
