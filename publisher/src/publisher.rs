//! Resilient publisher: pending queue, failure policy and delivery loop
//!
//! # Flush cycle
//!
//! ```text
//! live queue  [b1 b2 b3]            publish() during the flush
//!                 │ detach                    │
//!                 ▼                           ▼
//! working set [b1 b2 b3]      live queue  [b4]
//!   send b1 ✓  send b2 ✗ (DeliveryFailure)
//!                 │
//!   policy: queue/default → keep [b2 b3]   drop → keep []
//!                 │
//!                 ▼ re-merge
//! live queue  [b2 b3 b4]            queue policy: trim oldest to max_queue_length
//! ```
//!
//! Only one flush drains at a time. A flush started while another is running
//! (for example from a sender that publishes on its own completion path) leaves the
//! queue to the running flush, so the sender always sees arrival order.

use crate::batch::{Batch, BatchBuilder};
use crate::config::PublisherConfig;
use crate::error::{PublishError, Result, SendError};
use crate::metrics;
use crate::policy::Policy;
use crate::queue::PendingQueue;
use crate::sample::{Context, MeterMessageSerializer, Sample, SampleSerializer};
use crate::send::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

const REASON_POLICY_DROP: &str = "policy_drop";
const REASON_QUEUE_OVERFLOW: &str = "queue_overflow";

/// Counters describing what the publisher has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Samples accepted by `publish`
    pub samples_published: u64,
    /// Batches the sender accepted
    pub batches_sent: u64,
    /// Batches discarded by the `drop` policy
    pub batches_dropped: u64,
    /// Batches evicted to respect `max_queue_length`
    pub batches_evicted: u64,
    /// Delivery failures seen by the flush loop
    pub delivery_failures: u64,
}

#[derive(Default)]
struct StatCounters {
    samples_published: AtomicU64,
    batches_sent: AtomicU64,
    batches_dropped: AtomicU64,
    batches_evicted: AtomicU64,
    delivery_failures: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            samples_published: self.samples_published.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            batches_evicted: self.batches_evicted.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Marks a flush as running; cleared on drop
struct FlushGuard<'a>(&'a AtomicBool);

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard(flag))
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Batches detached from the live queue by one flush.
///
/// Whatever is left when this is dropped goes back to the front of the live queue,
/// ahead of batches that arrived meanwhile. That also covers a flush future
/// dropped mid-send. `in_flight` mirrors the remaining count so overlapping
/// callers can bound the live queue behind it.
struct WorkingSet<'a> {
    live: &'a Mutex<PendingQueue>,
    in_flight: &'a AtomicUsize,
    batches: VecDeque<Batch>,
}

impl<'a> WorkingSet<'a> {
    fn detach(live: &'a Mutex<PendingQueue>, in_flight: &'a AtomicUsize) -> Self {
        let mut queue = live.lock();
        let batches = queue.take();
        in_flight.store(batches.len(), Ordering::Release);
        drop(queue);
        Self {
            live,
            in_flight,
            batches,
        }
    }

    fn pop_sent(&mut self) -> Option<Batch> {
        let sent = self.batches.pop_front();
        self.in_flight.store(self.batches.len(), Ordering::Release);
        sent
    }

    fn discard(&mut self) {
        self.batches.clear();
        self.in_flight.store(0, Ordering::Release);
    }

    fn sample_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

impl Drop for WorkingSet<'_> {
    fn drop(&mut self) {
        let remainder = std::mem::take(&mut self.batches);
        let mut live = self.live.lock();
        live.requeue_front(remainder);
        self.in_flight.store(0, Ordering::Release);
    }
}

/// Publishes metering samples through a [`Sender`], absorbing delivery failures
/// according to its [`Policy`]
///
/// # Example
///
/// ```ignore
/// let config = PublisherConfig::from_url("rpc://?policy=queue&per_meter_topic=1")?;
/// let sender = Arc::new(RpcSender::new(Arc::new(StdoutTransport::new())));
/// let publisher = ResilientPublisher::new(&config, sender);
///
/// publisher.publish(&Context::new(), &samples).await?;
/// ```
pub struct ResilientPublisher {
    sender: Arc<dyn Sender>,
    builder: BatchBuilder,
    policy: Policy,
    max_queue_length: usize,
    queue: Mutex<PendingQueue>,
    flushing: AtomicBool,
    in_flight: AtomicUsize,
    stats: StatCounters,
}

impl ResilientPublisher {
    /// Create a publisher using the default meter message serializer
    pub fn new(config: &PublisherConfig, sender: Arc<dyn Sender>) -> Self {
        Self::with_serializer(config, sender, Arc::new(MeterMessageSerializer))
    }

    /// Create a publisher with a custom sample serializer
    pub fn with_serializer(
        config: &PublisherConfig,
        sender: Arc<dyn Sender>,
        serializer: Arc<dyn SampleSerializer>,
    ) -> Self {
        tracing::info!(
            sender = sender.name(),
            destination = %config.destination,
            policy = %config.policy,
            per_category_fanout = config.per_category_fanout,
            max_queue_length = config.max_queue_length,
            "publisher created"
        );

        Self {
            builder: BatchBuilder::new(
                config.destination.clone(),
                config.per_category_fanout,
                serializer,
            ),
            sender,
            policy: config.policy,
            max_queue_length: config.max_queue_length,
            queue: Mutex::new(PendingQueue::new()),
            flushing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            stats: StatCounters::default(),
        }
    }

    /// Queue the batches built from `samples`, then attempt one flush.
    ///
    /// Under `queue` and `drop` policies this only fails for non-delivery sender
    /// errors. Under `default` a delivery failure is returned as
    /// [`PublishError::Delivery`] with the batches still queued.
    pub async fn publish(&self, context: &Context, samples: &[Sample]) -> Result<()> {
        let batches = self.builder.build(context, samples);
        self.stats
            .samples_published
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        metrics::try_record_published(samples.len());

        {
            let mut queue = self.queue.lock();
            tracing::debug!(
                samples = samples.len(),
                batches = batches.len(),
                queued = queue.len(),
                "enqueuing batches"
            );
            queue.extend(batches);
        }

        self.flush().await
    }

    /// Drain the pending queue through the sender.
    ///
    /// Returns immediately with `Ok(())` if another flush is already draining. Under
    /// the `queue` policy the bound still applies then, counting the batches the
    /// running flush holds ahead of the live queue.
    pub async fn flush(&self) -> Result<()> {
        let Some(_flushing) = FlushGuard::acquire(&self.flushing) else {
            tracing::trace!("flush already in progress, leaving queue to it");
            if self.policy == Policy::Queue {
                self.enforce_queue_bound();
            }
            metrics::try_set_queue_length(self.queue_len());
            return Ok(());
        };

        let mut working = WorkingSet::detach(&self.queue, &self.in_flight);
        let result = self.drain(&mut working).await;
        drop(working);

        let fatal = matches!(result, Err(PublishError::Send(_)));
        if self.policy == Policy::Queue && !fatal {
            self.enforce_queue_bound();
        }
        metrics::try_set_queue_length(self.queue_len());

        result
    }

    /// Send working-set batches in order until empty or the first failure
    async fn drain(&self, working: &mut WorkingSet<'_>) -> Result<()> {
        while let Some(batch) = working.batches.front() {
            let started = Instant::now();
            let outcome = self
                .sender
                .send(batch.context(), batch.destination(), batch.payload())
                .await;

            match outcome {
                Ok(()) => {
                    if let Some(sent) = working.pop_sent() {
                        tracing::trace!(
                            destination = sent.destination(),
                            samples = sent.len(),
                            "batch sent"
                        );
                    }
                    self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                    metrics::try_record_sent(self.sender.name(), started.elapsed().as_secs_f64());
                }
                Err(e) if e.is_delivery_failure() => {
                    self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::try_record_delivery_failure(self.sender.name());
                    return self.apply_policy(working, e);
                }
                Err(e) => {
                    tracing::error!(
                        sender = self.sender.name(),
                        destination = batch.destination(),
                        error = %e,
                        "sender failed with a non-delivery error"
                    );
                    return Err(PublishError::Send(e));
                }
            }
        }

        Ok(())
    }

    /// Decide what survives of the working set after a delivery failure
    fn apply_policy(&self, working: &mut WorkingSet<'_>, error: SendError) -> Result<()> {
        let batches = working.batches.len();
        let samples = working.sample_count();

        match self.policy {
            Policy::Queue => {
                tracing::warn!(
                    samples,
                    batches,
                    error = %error,
                    "failed to publish samples, queueing them"
                );
                Ok(())
            }
            Policy::Drop => {
                tracing::warn!(
                    samples,
                    batches,
                    error = %error,
                    "failed to publish samples, dropping them"
                );
                working.discard();
                self.stats
                    .batches_dropped
                    .fetch_add(batches as u64, Ordering::Relaxed);
                metrics::try_record_dropped(REASON_POLICY_DROP, batches, samples);
                Ok(())
            }
            Policy::Default => {
                let destination = working
                    .batches
                    .front()
                    .map(|b| b.destination().to_string())
                    .unwrap_or_default();
                tracing::error!(
                    destination = %destination,
                    samples,
                    batches,
                    error = %error,
                    "failed to publish samples"
                );
                Err(PublishError::Delivery {
                    destination,
                    source: error,
                })
            }
        }
    }

    fn enforce_queue_bound(&self) {
        let eviction = {
            let mut queue = self.queue.lock();
            let in_flight = self.in_flight.load(Ordering::Acquire);
            queue.enforce_bound(self.max_queue_length, in_flight)
        };
        if eviction.is_empty() {
            return;
        }

        self.stats
            .batches_evicted
            .fetch_add(eviction.batches as u64, Ordering::Relaxed);
        metrics::try_record_dropped(REASON_QUEUE_OVERFLOW, eviction.batches, eviction.samples);
        tracing::warn!(
            batches = eviction.batches,
            samples = eviction.samples,
            max_queue_length = self.max_queue_length,
            "publisher max queue length exceeded, dropping oldest batches"
        );
    }

    /// One last flush attempt, then shut the sender down
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "final flush failed");
        }

        let pending = self.queue_len();
        if pending > 0 {
            tracing::warn!(
                pending_batches = pending,
                pending_samples = self.pending_samples(),
                "publisher has undelivered batches at shutdown, they will be lost"
            );
        }

        self.sender.shutdown().await.map_err(PublishError::Send)
    }

    /// Batches waiting for the next flush
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Samples carried by queued batches
    pub fn pending_samples(&self) -> usize {
        self.queue.lock().sample_count()
    }

    /// Destinations of queued batches, oldest first
    pub fn pending_destinations(&self) -> Vec<String> {
        self.queue
            .lock()
            .iter()
            .map(|b| b.destination().to_string())
            .collect()
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats.snapshot()
    }

    /// Health of the underlying sender
    pub async fn health(&self) -> bool {
        self.sender.health().await
    }
}
