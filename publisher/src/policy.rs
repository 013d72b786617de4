//! Publishing policy: what happens to queued batches when delivery fails

use crate::error::PublishError;
use std::fmt;
use std::str::FromStr;

/// Retention rule applied on the first delivery failure of a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Surface the failure to the caller, keep the remainder queued
    #[default]
    Default,
    /// Keep the remainder queued, bounded by `max_queue_length`
    Queue,
    /// Discard the failing batch and everything after it
    Drop,
}

impl Policy {
    /// Resolve a configured policy name.
    ///
    /// Unknown names fall back to [`Policy::Default`]; the second element carries the
    /// diagnostic in that case so callers can record it.
    pub fn resolve(raw: &str) -> (Policy, Option<String>) {
        match raw.parse::<Policy>() {
            Ok(policy) => {
                tracing::info!(policy = %policy, "publishing policy set");
                (policy, None)
            }
            Err(_) => {
                tracing::warn!(
                    requested = raw,
                    "publishing policy is unknown, forcing default"
                );
                (
                    Policy::Default,
                    Some(format!("unknown publishing policy '{raw}', using 'default'")),
                )
            }
        }
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Default => "default",
            Policy::Queue => "queue",
            Policy::Drop => "drop",
        }
    }

    /// Transport-level retries suited to this policy.
    ///
    /// `Queue` and `Drop` handle outages themselves, so the transport retries once and
    /// gives up quickly. `None` leaves the budget to the sender's own configuration.
    pub fn transport_retries(&self) -> Option<u32> {
        match self {
            Policy::Queue | Policy::Drop => Some(1),
            Policy::Default => None,
        }
    }
}

impl FromStr for Policy {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Policy::Default),
            "queue" => Ok(Policy::Queue),
            "drop" => Ok(Policy::Drop),
            other => Err(PublishError::Config(format!(
                "invalid policy: {other} (expected 'default', 'queue' or 'drop')"
            ))),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
