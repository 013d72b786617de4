//! Sender system for the publisher
//!
//! A [`Sender`] delivers one batch payload to a destination. The message-shaping
//! senders ([`RpcSender`], [`NotifierSender`]) encode an envelope and hand the bytes to
//! a [`Transport`]; [`RetrySender`] wraps any sender with backoff.

pub mod notifier;
pub mod retry;
pub mod rpc;
pub mod stdout;
pub mod webhook;

use crate::error::SendError;
use crate::sample::{Context, MeterRecord};
use async_trait::async_trait;
use bytes::Bytes;

pub use notifier::NotifierSender;
pub use retry::{BackoffConfig, RetrySender};
pub use rpc::RpcSender;
pub use stdout::{StdoutFormat, StdoutTransport};
pub use webhook::WebhookTransport;

/// Sender trait - delivers batch payloads to destinations
///
/// # Example
///
/// ```ignore
/// struct KafkaSender {
///     producer: MyProducer,
/// }
///
/// #[async_trait]
/// impl Sender for KafkaSender {
///     fn name(&self) -> &'static str { "kafka" }
///
///     async fn send(
///         &self,
///         _context: &Context,
///         destination: &str,
///         payload: &[MeterRecord],
///     ) -> Result<(), SendError> {
///         let body = serde_json::to_vec(payload)?;
///         self.producer
///             .produce(destination, body)
///             .await
///             .map_err(|e| SendError::Delivery(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Sender: Send + Sync {
    /// Sender name for identification and logging
    fn name(&self) -> &'static str;

    /// Deliver one payload to `destination`
    ///
    /// # Returns
    /// * `Ok(())` - the transport accepted responsibility for the payload
    /// * `Err(SendError::Delivery)` - transient outage, subject to publishing policy
    /// * any other `Err` - programming or configuration error, never retried
    async fn send(
        &self,
        context: &Context,
        destination: &str,
        payload: &[MeterRecord],
    ) -> Result<(), SendError>;

    /// Health check for the destination
    async fn health(&self) -> bool {
        true
    }

    /// Graceful shutdown
    async fn shutdown(&self) -> Result<(), SendError> {
        Ok(())
    }
}

/// Byte-level message bus used by the envelope-shaping senders
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for identification and logging
    fn name(&self) -> &'static str;

    /// Deliver an encoded message on `topic`
    async fn deliver(&self, topic: &str, body: Bytes) -> Result<(), SendError>;

    /// Health check for the bus
    async fn health(&self) -> bool;

    /// Graceful shutdown
    async fn shutdown(&self) -> Result<(), SendError> {
        Ok(())
    }
}
