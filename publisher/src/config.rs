//! Configuration for the publisher
//!
//! Two layers:
//! - [`PublisherConfig`] describes one publisher and is usually parsed from a
//!   publisher URL such as `rpc://?per_meter_topic=1&policy=queue&max_queue_length=512`.
//! - [`Config`] is the process configuration of the `meterpub` binary, read from
//!   `METERPUB_*` environment variables.

use crate::error::{PublishError, Result};
use crate::policy::Policy;
use crate::send::{notifier, rpc};
use std::collections::HashMap;
use std::env;
use url::Url;

/// Default base destination for metering batches
pub const DEFAULT_DESTINATION: &str = "metering";

/// Default bound on queued batches under the `queue` policy
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 1024;

/// Which message-shaping sender a publisher URL selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderKind {
    #[default]
    Rpc,
    Notifier,
}

/// Configuration of a single publisher
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Sender variant
    pub sender: SenderKind,

    /// Base destination; fan-out batches go to `<destination>.<category>`
    pub destination: String,

    /// Also publish one batch per sample category
    pub per_category_fanout: bool,

    /// Retention rule on delivery failure
    pub policy: Policy,

    /// Queue bound under the `queue` policy (0 = unbounded)
    pub max_queue_length: usize,

    /// RPC method cast by the RPC sender
    pub target: String,

    /// Bus topic used by the notifier sender
    pub notifier_topic: String,

    warnings: Vec<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sender: SenderKind::Rpc,
            destination: DEFAULT_DESTINATION.to_string(),
            per_category_fanout: false,
            policy: Policy::Default,
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            target: rpc::DEFAULT_TARGET.to_string(),
            notifier_topic: notifier::DEFAULT_TOPIC.to_string(),
            warnings: Vec::new(),
        }
    }
}

impl PublisherConfig {
    /// Default configuration publishing under `destination`
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable per-category fan-out
    pub fn with_fanout(mut self, enabled: bool) -> Self {
        self.per_category_fanout = enabled;
        self
    }

    /// Queue bound under the `queue` policy (0 = unbounded)
    pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
        self.max_queue_length = max_queue_length;
        self
    }

    /// Set the policy from its configured name.
    ///
    /// Unknown names become [`Policy::Default`] and leave a diagnostic in
    /// [`warnings`](Self::warnings) instead of failing.
    pub fn with_policy_name(mut self, raw: &str) -> Self {
        let (policy, warning) = Policy::resolve(raw);
        self.policy = policy;
        self.warnings.extend(warning);
        self
    }

    /// Diagnostics recorded while building this configuration
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Parse a publisher URL.
    ///
    /// The scheme selects the sender (`rpc` or `notifier`). Recognized query options:
    /// `per_meter_topic` (integer flag), `policy`, `max_queue_length`, `target`,
    /// `topic` and `notifier_topic`. When an option repeats, the last value wins.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| PublishError::Config(format!("invalid publisher URL '{raw}': {e}")))?;

        let sender = match url.scheme() {
            "rpc" => SenderKind::Rpc,
            "notifier" => SenderKind::Notifier,
            other => {
                return Err(PublishError::Config(format!(
                    "unknown publisher scheme: {other} (expected 'rpc' or 'notifier')"
                )));
            }
        };

        let options: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let mut config = PublisherConfig {
            sender,
            ..Default::default()
        };

        if let Some(flag) = options.get("per_meter_topic") {
            let flag: i64 = flag
                .trim()
                .parse()
                .map_err(|e| PublishError::Config(format!("invalid per_meter_topic: {e}")))?;
            config.per_category_fanout = flag != 0;
        }

        if let Some(len) = options.get("max_queue_length") {
            config.max_queue_length = len
                .trim()
                .parse()
                .map_err(|e| PublishError::Config(format!("invalid max_queue_length: {e}")))?;
        }

        if let Some(target) = options.get("target") {
            config.target = target.clone();
        }

        if let Some(topic) = options.get("topic") {
            config.destination = topic.clone();
        }

        if let Some(topic) = options.get("notifier_topic") {
            config.notifier_topic = topic.clone();
        }

        let policy = options.get("policy").map(String::as_str).unwrap_or("default");
        Ok(config.with_policy_name(policy))
    }
}

/// Where the binary's senders put encoded messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Stdout,
    /// HTTP POST to `<base url>/<topic>`
    Webhook(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Process configuration for the `meterpub` binary
#[derive(Debug, Clone)]
pub struct Config {
    /// Publisher URL, see [`PublisherConfig::from_url`]
    pub publisher_url: String,

    pub transport: TransportKind,

    /// Host name used in notifier publisher IDs and sample contexts
    pub host: String,

    /// Interval between background flushes in milliseconds
    pub flush_interval_ms: u64,

    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            publisher_url: "rpc://".to_string(),
            transport: TransportKind::Stdout,
            host: "localhost".to_string(),
            flush_interval_ms: 1000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(url) = lookup("METERPUB_PUBLISHER_URL") {
            config.publisher_url = url;
        }

        if let Some(transport) = lookup("METERPUB_TRANSPORT") {
            config.transport = match transport.as_str() {
                "stdout" => TransportKind::Stdout,
                url if url.starts_with("http://") || url.starts_with("https://") => {
                    TransportKind::Webhook(url.to_string())
                }
                other => {
                    return Err(PublishError::Config(format!(
                        "invalid METERPUB_TRANSPORT: {other} (expected 'stdout' or an http(s) URL)"
                    )));
                }
            };
        }

        if let Some(host) = lookup("METERPUB_HOST").or_else(|| lookup("HOSTNAME")) {
            config.host = host;
        }

        if let Some(interval) = lookup("METERPUB_FLUSH_INTERVAL_MS") {
            config.flush_interval_ms = interval.parse().map_err(|e| {
                PublishError::Config(format!("invalid METERPUB_FLUSH_INTERVAL_MS: {e}"))
            })?;
            if config.flush_interval_ms == 0 {
                return Err(PublishError::Config(
                    "METERPUB_FLUSH_INTERVAL_MS must be greater than zero".to_string(),
                ));
            }
        }

        if let Some(level) = lookup("METERPUB_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("METERPUB_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(PublishError::Config(format!(
                        "invalid METERPUB_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        Ok(config)
    }
}
