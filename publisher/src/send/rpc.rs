//! RPC cast sender
//!
//! Casts `record_metering_data(data=<payload>)` to the batch destination, which acts
//! as the RPC topic. Casts are fire-and-forget: no reply is awaited.

use crate::error::SendError;
use crate::sample::{Context, MeterRecord};
use crate::send::{Sender, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

/// Default RPC method invoked on the collector side
pub const DEFAULT_TARGET: &str = "record_metering_data";

const RPC_VERSION: &str = "1.0";

#[derive(Serialize)]
struct CastEnvelope<'a> {
    method: &'a str,
    version: &'static str,
    context: &'a Context,
    args: CastArgs<'a>,
}

#[derive(Serialize)]
struct CastArgs<'a> {
    data: &'a [MeterRecord],
}

/// Sender that delivers batches as RPC casts
pub struct RpcSender {
    transport: Arc<dyn Transport>,
    target: String,
}

impl RpcSender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_target(transport, DEFAULT_TARGET)
    }

    /// Cast to a custom method name
    pub fn with_target(transport: Arc<dyn Transport>, target: impl Into<String>) -> Self {
        Self {
            transport,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Sender for RpcSender {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn send(
        &self,
        context: &Context,
        destination: &str,
        payload: &[MeterRecord],
    ) -> Result<(), SendError> {
        let envelope = CastEnvelope {
            method: &self.target,
            version: RPC_VERSION,
            context,
            args: CastArgs { data: payload },
        };
        let body = Bytes::from(serde_json::to_vec(&envelope)?);

        tracing::trace!(
            transport = self.transport.name(),
            topic = destination,
            samples = payload.len(),
            "casting metering data"
        );
        self.transport.deliver(destination, body).await
    }

    async fn health(&self) -> bool {
        self.transport.health().await
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        self.transport.shutdown().await
    }
}
