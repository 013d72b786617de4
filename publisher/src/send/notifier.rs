//! Notification sender
//!
//! Emits each batch as a `SAMPLE`-priority notification whose event type is the batch
//! destination. All notifications travel on one bus topic, `<topic>.sample`.

use crate::error::SendError;
use crate::sample::{Context, MeterRecord};
use crate::send::{Sender, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default notification topic
pub const DEFAULT_TOPIC: &str = "metering";

const PRIORITY: &str = "SAMPLE";

#[derive(Serialize)]
struct Notification<'a> {
    message_id: String,
    publisher_id: &'a str,
    event_type: &'a str,
    priority: &'static str,
    timestamp: String,
    context: BTreeMap<String, String>,
    payload: &'a [MeterRecord],
}

/// Sender that delivers batches as sample notifications
pub struct NotifierSender {
    transport: Arc<dyn Transport>,
    publisher_id: String,
    topic: String,
}

impl NotifierSender {
    /// Create a notifier publishing as `metering.publisher.<host>`
    pub fn new(transport: Arc<dyn Transport>, host: &str) -> Self {
        Self {
            transport,
            publisher_id: format!("metering.publisher.{host}"),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }

    /// Use a different notification topic
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    fn bus_topic(&self) -> String {
        format!("{}.{}", self.topic, PRIORITY.to_lowercase())
    }
}

#[async_trait]
impl Sender for NotifierSender {
    fn name(&self) -> &'static str {
        "notifier"
    }

    async fn send(
        &self,
        context: &Context,
        destination: &str,
        payload: &[MeterRecord],
    ) -> Result<(), SendError> {
        let notification = Notification {
            message_id: ulid::Ulid::new().to_string(),
            publisher_id: &self.publisher_id,
            event_type: destination,
            priority: PRIORITY,
            timestamp: chrono::Utc::now().to_rfc3339(),
            context: context.to_map(),
            payload,
        };
        let body = Bytes::from(serde_json::to_vec(&notification)?);

        self.transport.deliver(&self.bus_topic(), body).await
    }

    async fn health(&self) -> bool {
        self.transport.health().await
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        self.transport.shutdown().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sample::{MeterMessageSerializer, Sample, SampleSerializer, SampleType};
    use crate::send::test_support::RecordingTransport;

    fn records() -> Vec<MeterRecord> {
        ["cpu", "memory"]
            .iter()
            .map(|name| {
                MeterMessageSerializer.serialize(&Sample::new(*name, SampleType::Gauge, "x", 1.0, "vm"))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_notification_shape() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = NotifierSender::new(transport.clone(), "node-1");
        let ctx = Context::new().with("user", "bob");

        sender.send(&ctx, "metering.cpu", &records()).await.unwrap();

        let (topic, json) = transport.last_json().unwrap();
        assert_eq!(topic, "metering.sample");
        assert_eq!(json["publisher_id"], "metering.publisher.node-1");
        assert_eq!(json["event_type"], "metering.cpu");
        assert_eq!(json["priority"], "SAMPLE");
        assert_eq!(json["context"]["user"], "bob");
        assert_eq!(json["payload"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_custom_topic() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = NotifierSender::new(transport.clone(), "node-1").topic("telemetry");

        sender.send(&Context::new(), "metering", &records()).await.unwrap();

        let (topic, _) = transport.last_json().unwrap();
        assert_eq!(topic, "telemetry.sample");
    }

    #[tokio::test]
    async fn test_message_ids_differ_per_send() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = NotifierSender::new(transport.clone(), "node-1");

        sender.send(&Context::new(), "metering", &records()).await.unwrap();
        let (_, first) = transport.last_json().unwrap();
        sender.send(&Context::new(), "metering", &records()).await.unwrap();
        let (_, second) = transport.last_json().unwrap();

        assert_ne!(first["message_id"], second["message_id"]);
    }
}
