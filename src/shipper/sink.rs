//! Log sink abstraction for where exchange records are sent.
//!
//! The engine only knows [`LogSink`]; the bridge wires in an
//! [`HttpLogSink`] that forwards to the shared background shipper.

use std::sync::Arc;

use bytes::Bytes;

use super::buffer::{LogShipper, ShipRequest};

/// Destination for NDJSON exchange records.
///
/// `emit` is fire-and-forget: it must not block the calling thread, and
/// failures never reach the caller.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: Bytes, api_key: &str);

    /// Get the sink name for logging.
    fn name(&self) -> &'static str;
}

/// Errors from log shipping.
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    #[error("no log collector endpoint configured")]
    NoEndpoint,

    #[error("log collector endpoint is not a valid URL: {0}")]
    InvalidEndpoint(String),

    #[error("log queue is full, record dropped")]
    QueueFull,

    #[error("log shipper worker has stopped")]
    Disconnected,

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("failed to spawn log shipper thread: {0}")]
    Spawn(String),
}

/// Sends records to one collector endpoint through the shared shipper.
pub struct HttpLogSink {
    shipper: Arc<LogShipper>,
    endpoint: String,
}

impl HttpLogSink {
    pub fn new(shipper: Arc<LogShipper>, endpoint: impl Into<String>) -> Self {
        Self {
            shipper,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl LogSink for HttpLogSink {
    fn emit(&self, record: Bytes, api_key: &str) {
        let request = ShipRequest {
            endpoint: self.endpoint.clone(),
            api_key: api_key.to_string(),
            body: record,
        };
        if let Err(e) = self.shipper.push(request) {
            // Overflow is already reported by the shipper.
            tracing::trace!(sink = self.name(), error = %e, "Log record not queued");
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

impl std::fmt::Debug for HttpLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLogSink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
