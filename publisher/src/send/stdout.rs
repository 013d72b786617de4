//! Stdout transport
//!
//! Writes each message to stdout as `[topic] body`, or as an indented JSON block.
//! Lets the binary run without a message bus.

use crate::error::SendError;
use crate::send::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// How message bodies are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdoutFormat {
    /// One line per message
    #[default]
    Line,
    /// Topic header followed by indented JSON
    Pretty,
}

pub struct StdoutTransport {
    format: StdoutFormat,
    delivered: AtomicU64,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self::with_format(StdoutFormat::Line)
    }

    pub fn with_format(format: StdoutFormat) -> Self {
        Self {
            format,
            delivered: AtomicU64::new(0),
        }
    }

    /// Messages written so far
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn render(&self, topic: &str, body: &[u8]) -> String {
        match self.format {
            StdoutFormat::Line => format!("[{topic}] {}\n", String::from_utf8_lossy(body)),
            StdoutFormat::Pretty => {
                let json = serde_json::from_slice::<serde_json::Value>(body)
                    .and_then(|v| serde_json::to_string_pretty(&v));
                let text = match json {
                    Ok(text) => text,
                    Err(_) => String::from_utf8_lossy(body).into_owned(),
                };

                let mut out = format!("{topic} ({} bytes)\n", body.len());
                for line in text.lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
                out
            }
        }
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn deliver(&self, topic: &str, body: Bytes) -> Result<(), SendError> {
        let rendered = self.render(topic, &body);
        std::io::stdout()
            .lock()
            .write_all(rendered.as_bytes())
            .map_err(|e| SendError::Delivery(format!("stdout write failed: {e}")))?;

        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        std::io::stdout()
            .flush()
            .map_err(|e| SendError::Shutdown(format!("failed to flush stdout: {e}")))
    }
}
