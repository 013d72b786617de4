//! HTTP webhook transport
//!
//! POSTs each message body to `<base_url>/<topic>`.
//!
//! # Example
//!
//! ```ignore
//! let transport = WebhookTransport::new("https://collector.example.com/topics")?
//!     .header("Authorization", "Bearer token123");
//! let sender = RpcSender::new(Arc::new(transport));
//! ```

use crate::error::SendError;
use crate::send::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP webhook transport - POSTs message bodies as JSON
pub struct WebhookTransport {
    client: Client,
    base_url: String,
    health_url: Option<String>,
    headers: HashMap<String, String>,
}

impl WebhookTransport {
    /// Create a transport posting under `base_url`
    ///
    /// # Errors
    /// Returns `SendError::Init` if the HTTP client cannot be created
    pub fn new(base_url: impl Into<String>) -> Result<Self, SendError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SendError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SendError::Init(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_url: None,
            headers: HashMap::new(),
        })
    }

    /// Use a dedicated health endpoint instead of HEAD on the base URL
    pub fn health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }

    /// Add a custom header to all requests
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/{}", self.base_url, topic)
    }
}

/// Server errors, throttling and timeouts are outages; other statuses are permanent
fn classify_status(status: StatusCode, body: String) -> SendError {
    let message = format!("webhook returned {status}: {body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SendError::Delivery(message)
    } else {
        SendError::Rejected(message)
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, topic: &str, body: Bytes) -> Result<(), SendError> {
        let url = self.topic_url(topic);
        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, status = %response.status(), "webhook delivered");
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(url = %url, status = %status, body = %body, "webhook request failed");
                Err(classify_status(status, body))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "webhook connection failed");
                Err(SendError::Delivery(format!("failed to reach {url}: {e}")))
            }
        }
    }

    async fn health(&self) -> bool {
        let url = self.health_url.as_ref().unwrap_or(&self.base_url);

        match self.client.head(url).send().await {
            Ok(response) => {
                // Any non-5xx answer means the server is reachable
                let healthy = !response.status().is_server_error();
                if !healthy {
                    debug!(url = %url, status = %response.status(), "health check returned server error");
                }
                healthy
            }
            Err(e) => {
                debug!(url = %url, error = %e, "health check failed");
                false
            }
        }
    }
}
