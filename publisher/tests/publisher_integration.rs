//! Integration tests for the resilient publisher
//!
//! These drive the public API end to end: configuration, batch fan-out,
//! policy handling across outages and the shipped senders over a fake transport.

use async_trait::async_trait;
use bytes::Bytes;
use meterpub::{
    BackoffConfig, Context, MeterRecord, NotifierSender, Policy, PublishError, PublisherConfig,
    ResilientPublisher, RetrySender, RpcSender, Sample, SampleType, SendError, Sender, Transport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

// ============================================================================
// Test Senders
// ============================================================================

/// Sender that can be switched down and records what it accepted
#[derive(Default)]
struct SwitchSender {
    down: AtomicBool,
    /// Fail every send after this many successes (0 = never)
    fail_after: AtomicU64,
    attempts: AtomicU64,
    accepted: Mutex<Vec<(String, Vec<f64>)>>,
}

impl SwitchSender {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn accepted(&self) -> Vec<(String, Vec<f64>)> {
        self.accepted.lock().clone()
    }

    fn accepted_destinations(&self) -> Vec<String> {
        self.accepted.lock().iter().map(|(d, _)| d.clone()).collect()
    }

    fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for SwitchSender {
    fn name(&self) -> &'static str {
        "switch"
    }

    async fn send(
        &self,
        _context: &Context,
        destination: &str,
        payload: &[MeterRecord],
    ) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let fail_after = self.fail_after.load(Ordering::SeqCst);
        let sent = self.accepted.lock().len() as u64;
        if self.down.load(Ordering::SeqCst) || (fail_after > 0 && sent >= fail_after) {
            return Err(SendError::Delivery("broker unreachable".into()));
        }

        let volumes = payload.iter().map(|r| r.counter_volume).collect();
        self.accepted.lock().push((destination.to_string(), volumes));
        Ok(())
    }
}

/// Sender that publishes once more through its own publisher while sending
#[derive(Default)]
struct EchoSender {
    publisher: OnceLock<Weak<ResilientPublisher>>,
    echoed: AtomicBool,
    accepted: Mutex<Vec<Vec<f64>>>,
}

#[async_trait]
impl Sender for EchoSender {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn send(
        &self,
        _context: &Context,
        _destination: &str,
        payload: &[MeterRecord],
    ) -> Result<(), SendError> {
        if !self.echoed.swap(true, Ordering::SeqCst) {
            let publisher = self.publisher.get().and_then(Weak::upgrade);
            if let Some(publisher) = publisher {
                publisher
                    .publish(&Context::new(), &volumes("echo", &[99.0]))
                    .await
                    .map_err(|e| SendError::Rejected(e.to_string()))?;
            }
        }

        self.accepted
            .lock()
            .push(payload.iter().map(|r| r.counter_volume).collect());
        Ok(())
    }
}

/// Sender that publishes several batches through its own publisher on the first send
/// and records the queue length seen after each nested publish
#[derive(Default)]
struct BurstSender {
    publisher: OnceLock<Weak<ResilientPublisher>>,
    burst: usize,
    fired: AtomicBool,
    observed: Mutex<Vec<usize>>,
}

#[async_trait]
impl Sender for BurstSender {
    fn name(&self) -> &'static str {
        "burst"
    }

    async fn send(
        &self,
        _context: &Context,
        _destination: &str,
        _payload: &[MeterRecord],
    ) -> Result<(), SendError> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(publisher) = self.publisher.get().and_then(Weak::upgrade) else {
            return Ok(());
        };
        for i in 0..self.burst {
            publisher
                .publish(&Context::new(), &volumes("burst", &[i as f64]))
                .await
                .map_err(|e| SendError::Rejected(e.to_string()))?;
            self.observed.lock().push(publisher.queue_len());
        }
        Ok(())
    }
}

/// Transport that fails a set number of times, then records deliveries
#[derive(Default)]
struct FlakyTransport {
    failures_remaining: AtomicU32,
    delivered: Mutex<Vec<(String, Bytes)>>,
}

impl FlakyTransport {
    fn failing(times: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            ..Default::default()
        }
    }

    fn delivered_json(&self) -> Vec<(String, serde_json::Value)> {
        self.delivered
            .lock()
            .iter()
            .map(|(topic, body)| {
                let value = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
                (topic.clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn deliver(&self, topic: &str, body: Bytes) -> Result<(), SendError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SendError::Delivery("connection reset".into()));
        }
        self.delivered.lock().push((topic.to_string(), body));
        Ok(())
    }

    async fn health(&self) -> bool {
        self.failures_remaining.load(Ordering::SeqCst) == 0
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn volumes(name: &str, values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .map(|v| Sample::new(name, SampleType::Gauge, "u", *v, "vm-1"))
        .collect()
}

fn config(policy: Policy) -> PublisherConfig {
    PublisherConfig::new("D").with_policy(policy)
}

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_retries: 3,
        jitter_factor: 0.0,
    }
}

// ============================================================================
// Policy Behaviour
// ============================================================================

#[tokio::test]
async fn test_queue_policy_preserves_order_across_outage() {
    let sender = Arc::new(SwitchSender::default());
    let publisher = ResilientPublisher::new(&config(Policy::Queue), sender.clone());
    let ctx = Context::new();

    sender.set_down(true);
    for v in [1.0, 2.0, 3.0] {
        publisher.publish(&ctx, &volumes("cpu", &[v])).await.unwrap();
    }
    assert_eq!(publisher.queue_len(), 3);

    sender.set_down(false);
    publisher.publish(&ctx, &volumes("cpu", &[4.0])).await.unwrap();

    let order: Vec<Vec<f64>> = sender.accepted().into_iter().map(|(_, v)| v).collect();
    assert_eq!(order, vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]]);
    assert_eq!(publisher.queue_len(), 0);
}

#[tokio::test]
async fn test_queue_policy_loses_nothing_below_capacity() {
    let sender = Arc::new(SwitchSender::default());
    let publisher = ResilientPublisher::new(&config(Policy::Queue), sender.clone());
    let ctx = Context::new();

    sender.set_down(true);
    for i in 0..50 {
        publisher
            .publish(&ctx, &volumes("cpu", &[i as f64, i as f64 + 0.5]))
            .await
            .unwrap();
    }
    assert_eq!(publisher.pending_samples(), 100);

    sender.set_down(false);
    publisher.flush().await.unwrap();

    let delivered: usize = sender.accepted().iter().map(|(_, v)| v.len()).sum();
    assert_eq!(delivered, 100);
    assert_eq!(publisher.stats().batches_evicted, 0);
}

#[tokio::test]
async fn test_queue_policy_bounds_memory() {
    let sender = Arc::new(SwitchSender::default());
    let publisher = ResilientPublisher::new(
        &config(Policy::Queue).with_max_queue_length(2),
        sender.clone(),
    );
    let ctx = Context::new();

    sender.set_down(true);
    for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
        publisher.publish(&ctx, &volumes("cpu", &[v])).await.unwrap();
        assert!(publisher.queue_len() <= 2);
    }
    assert_eq!(publisher.stats().batches_evicted, 3);

    sender.set_down(false);
    publisher.flush().await.unwrap();

    let order: Vec<Vec<f64>> = sender.accepted().into_iter().map(|(_, v)| v).collect();
    assert_eq!(order, vec![vec![4.0], vec![5.0]]);
}

#[tokio::test]
async fn test_drop_policy_discards_rest_of_flush() {
    let sender = Arc::new(SwitchSender {
        fail_after: AtomicU64::new(1),
        ..Default::default()
    });
    let publisher = ResilientPublisher::new(
        &config(Policy::Drop).with_fanout(true),
        sender.clone(),
    );

    let mut samples = volumes("A", &[1.0]);
    samples.extend(volumes("B", &[2.0]));
    samples.extend(volumes("C", &[3.0]));
    publisher.publish(&Context::new(), &samples).await.unwrap();

    assert_eq!(sender.accepted_destinations(), vec!["D"]);
    assert_eq!(publisher.queue_len(), 0);
    assert_eq!(publisher.stats().batches_dropped, 3);

    sender.fail_after.store(0, Ordering::SeqCst);
    let attempts = sender.attempts();
    publisher.flush().await.unwrap();
    assert_eq!(sender.attempts(), attempts);
    assert_eq!(sender.accepted_destinations(), vec!["D"]);
}

#[tokio::test]
async fn test_default_policy_reports_and_retains() {
    let sender = Arc::new(SwitchSender::default());
    let publisher = ResilientPublisher::new(&config(Policy::Default), sender.clone());

    sender.set_down(true);
    let err = publisher
        .publish(&Context::new(), &volumes("cpu", &[1.0]))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Delivery { ref destination, .. } if destination == "D"));
    assert_eq!(publisher.queue_len(), 1);

    sender.set_down(false);
    publisher.flush().await.unwrap();
    assert_eq!(sender.accepted(), vec![("D".to_string(), vec![1.0])]);
}

// ============================================================================
// Fan-out and Configuration
// ============================================================================

#[tokio::test]
async fn test_fanout_per_category() {
    let sender = Arc::new(SwitchSender::default());
    let publisher = ResilientPublisher::new(
        &config(Policy::Default).with_fanout(true),
        sender.clone(),
    );

    let mut samples = volumes("A", &[1.0]);
    samples.extend(volumes("B", &[2.0]));
    samples.extend(volumes("A", &[3.0]));
    publisher.publish(&Context::new(), &samples).await.unwrap();

    assert_eq!(
        sender.accepted(),
        vec![
            ("D".to_string(), vec![1.0, 2.0, 3.0]),
            ("D.A".to_string(), vec![1.0, 3.0]),
            ("D.B".to_string(), vec![2.0]),
        ]
    );
}

#[tokio::test]
async fn test_unknown_policy_coerced_to_default() {
    let config = PublisherConfig::from_url("rpc://?policy=bogus&topic=D").unwrap();
    assert_eq!(config.policy, Policy::Default);
    assert_eq!(config.warnings().len(), 1);

    let sender = Arc::new(SwitchSender::default());
    let publisher = ResilientPublisher::new(&config, sender.clone());
    sender.set_down(true);

    let result = publisher.publish(&Context::new(), &volumes("cpu", &[1.0])).await;
    assert!(result.is_err());
    assert_eq!(publisher.queue_len(), 1);
}

// ============================================================================
// Reentrancy
// ============================================================================

#[tokio::test]
async fn test_publish_from_inside_send_waits_for_next_flush() {
    let sender = Arc::new(EchoSender::default());
    let publisher = Arc::new(ResilientPublisher::new(
        &config(Policy::Queue),
        sender.clone(),
    ));
    sender
        .publisher
        .set(Arc::downgrade(&publisher))
        .unwrap_or_else(|_| panic!("publisher already set"));

    publisher
        .publish(&Context::new(), &volumes("cpu", &[1.0]))
        .await
        .unwrap();

    // The nested batch waits behind the in-flight one
    assert_eq!(*sender.accepted.lock(), vec![vec![1.0]]);
    assert_eq!(publisher.queue_len(), 1);

    publisher.flush().await.unwrap();
    publisher.flush().await.unwrap();

    assert_eq!(*sender.accepted.lock(), vec![vec![1.0], vec![99.0]]);
    assert_eq!(publisher.queue_len(), 0);
}

#[tokio::test]
async fn test_publishes_during_flush_respect_queue_bound() {
    let sender = Arc::new(BurstSender {
        burst: 5,
        ..Default::default()
    });
    let publisher = Arc::new(ResilientPublisher::new(
        &config(Policy::Queue).with_max_queue_length(2),
        sender.clone(),
    ));
    sender
        .publisher
        .set(Arc::downgrade(&publisher))
        .unwrap_or_else(|_| panic!("publisher already set"));

    publisher
        .publish(&Context::new(), &volumes("cpu", &[1.0]))
        .await
        .unwrap();

    let observed = sender.observed.lock().clone();
    assert_eq!(observed.len(), 5);
    assert!(observed.iter().all(|&n| n <= 2), "queue lengths: {observed:?}");
    assert!(publisher.queue_len() <= 2);
    assert_eq!(publisher.stats().batches_evicted, 4);
}

#[tokio::test]
async fn test_empty_publish_casts_base_batch() {
    let sender = Arc::new(SwitchSender::default());
    let publisher =
        ResilientPublisher::new(&config(Policy::Default).with_fanout(true), sender.clone());

    publisher.publish(&Context::new(), &[]).await.unwrap();

    assert_eq!(sender.accepted(), vec![("D".to_string(), Vec::<f64>::new())]);
}

// ============================================================================
// Shipped Senders
// ============================================================================

#[tokio::test]
async fn test_rpc_sender_end_to_end() {
    let transport = Arc::new(FlakyTransport::default());
    let sender = Arc::new(RpcSender::new(transport.clone()));
    let publisher = ResilientPublisher::new(&config(Policy::Queue), sender);

    let ctx = Context::new().with("host", "node-1");
    publisher.publish(&ctx, &volumes("cpu", &[7.5])).await.unwrap();

    let delivered = transport.delivered_json();
    assert_eq!(delivered.len(), 1);
    let (topic, body) = &delivered[0];
    assert_eq!(topic, "D");
    assert_eq!(body["method"], "record_metering_data");
    assert_eq!(body["context"]["host"], "node-1");
    assert_eq!(body["args"]["data"][0]["counter_name"], "cpu");
    assert_eq!(body["args"]["data"][0]["counter_volume"], 7.5);
}

#[tokio::test]
async fn test_notifier_sender_end_to_end() {
    let transport = Arc::new(FlakyTransport::default());
    let sender = Arc::new(NotifierSender::new(transport.clone(), "node-1"));
    let publisher = ResilientPublisher::new(&config(Policy::Drop), sender);

    publisher
        .publish(&Context::new(), &volumes("memory", &[512.0]))
        .await
        .unwrap();

    let delivered = transport.delivered_json();
    assert_eq!(delivered.len(), 1);
    let (topic, body) = &delivered[0];
    assert_eq!(topic, "metering.sample");
    assert_eq!(body["event_type"], "D");
    assert_eq!(body["publisher_id"], "metering.publisher.node-1");
    assert_eq!(body["payload"][0]["counter_name"], "memory");
}

#[tokio::test]
async fn test_retry_sender_absorbs_blip_before_policy() {
    let transport = Arc::new(FlakyTransport::failing(1));
    let rpc: Arc<dyn Sender> = Arc::new(RpcSender::new(transport.clone()));
    let retry = Arc::new(RetrySender::new(
        rpc,
        fast_backoff().for_policy(Policy::Queue),
    ));
    let publisher = ResilientPublisher::new(&config(Policy::Queue), retry.clone());

    publisher
        .publish(&Context::new(), &volumes("cpu", &[1.0]))
        .await
        .unwrap();

    assert_eq!(retry.retry_count(), 1);
    assert_eq!(retry.recovered_count(), 1);
    assert_eq!(publisher.queue_len(), 0);
    assert_eq!(transport.delivered_json().len(), 1);
}

#[tokio::test]
async fn test_retry_exhaustion_falls_back_to_queue() {
    let transport = Arc::new(FlakyTransport::failing(10));
    let rpc: Arc<dyn Sender> = Arc::new(RpcSender::new(transport.clone()));
    let retry = Arc::new(RetrySender::new(
        rpc,
        fast_backoff().for_policy(Policy::Queue),
    ));
    let publisher = ResilientPublisher::new(&config(Policy::Queue), retry);

    publisher
        .publish(&Context::new(), &volumes("cpu", &[1.0]))
        .await
        .unwrap();

    assert_eq!(publisher.queue_len(), 1);
    assert!(transport.delivered_json().is_empty());
}

#[tokio::test]
async fn test_build_sender_from_url() {
    let config = PublisherConfig::from_url("notifier://?policy=drop&notifier_topic=telemetry")
        .unwrap();
    let transport = Arc::new(FlakyTransport::default());
    let sender = meterpub::build_sender(&config, transport.clone(), "node-9", fast_backoff());
    let publisher = ResilientPublisher::new(&config, sender);

    publisher
        .publish(&Context::new(), &volumes("cpu", &[1.0]))
        .await
        .unwrap();

    let delivered = transport.delivered_json();
    assert_eq!(delivered[0].0, "telemetry.sample");
    assert_eq!(delivered[0].1["event_type"], "metering");
}
