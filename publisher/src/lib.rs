//! meterpub - resilient metering-sample publisher
//!
//! Accepts batches of metering samples from a producing pipeline and hands them to
//! a message transport, absorbing transport outages according to a publishing
//! policy.
//!
//! # Architecture
//!
//! ```text
//! publish(ctx, samples) ──► BatchBuilder ──► PendingQueue ──► flush() ──► Sender ──► Transport
//!                                                 ▲                │
//!                                                 └── Policy ◄─────┘ DeliveryFailure
//! ```
//!
//! Senders are pluggable via the [`Sender`] trait; [`RpcSender`] and
//! [`NotifierSender`] shape messages for a byte-level [`Transport`].

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod batch;
pub mod config;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod publisher;
pub mod queue;
pub mod sample;
pub mod send;

pub use config::{Config, PublisherConfig, SenderKind};
pub use error::{PublishError, Result, SendError};
pub use policy::Policy;
pub use publisher::{PublisherStats, ResilientPublisher};
pub use sample::{Context, MeterRecord, Sample, SampleType};
pub use send::{
    BackoffConfig, NotifierSender, RetrySender, RpcSender, Sender, StdoutTransport, Transport,
    WebhookTransport,
};

use std::sync::Arc;

/// Build the sender a publisher configuration asks for, on top of `transport`.
///
/// The message-shaping sender is wrapped in a [`RetrySender`] whose budget follows
/// the configured policy.
pub fn build_sender(
    config: &PublisherConfig,
    transport: Arc<dyn Transport>,
    host: &str,
    backoff: BackoffConfig,
) -> Arc<dyn Sender> {
    let inner: Arc<dyn Sender> = match config.sender {
        SenderKind::Rpc => Arc::new(RpcSender::with_target(transport, config.target.clone())),
        SenderKind::Notifier => {
            Arc::new(NotifierSender::new(transport, host).topic(config.notifier_topic.clone()))
        }
    };
    Arc::new(RetrySender::new(inner, backoff.for_policy(config.policy)))
}
