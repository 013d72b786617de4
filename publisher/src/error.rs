//! Error types for the metering publisher

use thiserror::Error;

/// Result type alias for publisher operations
pub type Result<T> = std::result::Result<T, PublishError>;

/// Main error type for the publisher
#[derive(Error, Debug)]
pub enum PublishError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport could not deliver a batch and the `default` policy surfaces it.
    ///
    /// The failing batch is still queued when this is returned.
    #[error("delivery to '{destination}' failed: {source}")]
    Delivery {
        destination: String,
        #[source]
        source: SendError,
    },

    /// Non-retryable sender error, passed through unmodified
    #[error(transparent)]
    Send(#[from] SendError),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Error type returned by [`Sender`](crate::send::Sender) and transport implementations
///
/// Only [`SendError::Delivery`] is a delivery-policy event. Every other variant
/// describes a programming or configuration problem and reaches the producer as is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Transport rejected or could not complete the send (retryable)
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Envelope could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// Destination refused the message permanently
    #[error("rejected: {0}")]
    Rejected(String),

    /// Sender or transport failed to initialize
    #[error("initialization failed: {0}")]
    Init(String),

    /// Shutdown error
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl SendError {
    /// True for the one condition the publisher's policy handles
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, SendError::Delivery(_))
    }
}

impl From<serde_json::Error> for SendError {
    fn from(err: serde_json::Error) -> Self {
        SendError::Encode(err.to_string())
    }
}
