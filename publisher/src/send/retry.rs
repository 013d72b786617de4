//! Retry sender with exponential backoff
//!
//! Wraps a sender and re-attempts delivery failures before they reach the
//! publisher's policy. Fatal errors are returned on the first attempt.

use crate::error::SendError;
use crate::policy::Policy;
use crate::sample::{Context, MeterRecord};
use crate::send::Sender;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Backoff schedule for [`RetrySender`]
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Retries after the initial attempt (0 = single attempt)
    pub max_retries: u32,
    /// Spreads each delay by +/- this fraction (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 3,
            jitter_factor: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Retry budget matching a publishing policy.
    ///
    /// Policies that absorb outages locally retry once; `default` keeps the
    /// configured budget of `self`.
    pub fn for_policy(self, policy: Policy) -> Self {
        match policy.transport_retries() {
            Some(max_retries) => Self {
                max_retries,
                ..self
            },
            None => self,
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `spread` in [0.0, 1.0] picks a point in the jitter window; 0.5 is the
    /// undisturbed exponential value.
    pub fn backoff(&self, retry: u32, spread: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nominal = (self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay.as_nanos() as f64);

        let factor = 1.0 + self.jitter_factor * (spread.clamp(0.0, 1.0) * 2.0 - 1.0);
        Duration::from_nanos((nominal * factor).round().max(1_000.0) as u64)
    }
}

/// One SplitMix64 step over `state`
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Sender wrapper that retries delivery failures with exponential backoff
pub struct RetrySender {
    inner: Arc<dyn Sender>,
    config: BackoffConfig,
    jitter: Mutex<u64>,
    retry_count: AtomicU64,
    recovered_count: AtomicU64,
}

impl RetrySender {
    pub fn new(inner: Arc<dyn Sender>, config: BackoffConfig) -> Self {
        Self {
            inner,
            config,
            jitter: Mutex::new(ulid::Ulid::new().random() as u64),
            retry_count: AtomicU64::new(0),
            recovered_count: AtomicU64::new(0),
        }
    }

    /// Total retry attempts made
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Sends that succeeded after at least one failure
    pub fn recovered_count(&self) -> u64 {
        self.recovered_count.load(Ordering::Relaxed)
    }

    fn next_delay(&self, retry: u32) -> Duration {
        let spread = {
            let mut state = self.jitter.lock();
            (splitmix64(&mut state) >> 11) as f64 / (1u64 << 53) as f64
        };
        self.config.backoff(retry, spread)
    }
}

#[async_trait]
impl Sender for RetrySender {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn send(
        &self,
        context: &Context,
        destination: &str,
        payload: &[MeterRecord],
    ) -> Result<(), SendError> {
        let mut retry = 0;

        loop {
            match self.inner.send(context, destination, payload).await {
                Ok(()) => {
                    if retry > 0 {
                        self.recovered_count.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            sender = self.inner.name(),
                            destination,
                            retry,
                            "send recovered after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_delivery_failure() && retry < self.config.max_retries => {
                    retry += 1;
                    let delay = self.next_delay(retry);
                    self.retry_count.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        sender = self.inner.name(),
                        destination,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "send failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health(&self) -> bool {
        self.inner.health().await
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        self.inner.shutdown().await
    }
}
