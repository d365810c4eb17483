//! Bounded background queue that POSTs log records to a collector.
//!
//! `push` never blocks: records go onto a bounded crossbeam channel and a
//! dedicated thread drains it, driving `reqwest` on a single-threaded tokio
//! runtime. When the queue is full the record is dropped. Delivery is
//! best-effort; records still queued at process exit are lost.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::sink::ShipError;

pub const NDJSON_CONTENT_TYPE: &str = "application/nd-json";
pub const API_KEY_HEADER: &str = "x-ft-api-key";

const WORKER_THREAD_NAME: &str = "contract-bridge-log-shipper";

/// Configuration for the log shipper.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Records queued before new ones are dropped.
    /// Default: 1000
    pub queue_capacity: usize,
    /// Per-request timeout for collector POSTs.
    /// Default: 10 seconds
    pub timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&crate::config::LogShippingConfig> for ShipperConfig {
    fn from(config: &crate::config::LogShippingConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// One record on its way to a collector.
#[derive(Debug, Clone)]
pub struct ShipRequest {
    pub endpoint: String,
    pub api_key: String,
    pub body: Bytes,
}

pub struct LogShipper {
    sender: Sender<ShipRequest>,
    config: ShipperConfig,
    /// Count of records dropped due to queue overflow.
    dropped_count: AtomicU64,
}

impl LogShipper {
    /// Create the queue and start the delivery thread.
    ///
    /// The thread exits once every handle to the shipper is dropped.
    pub fn spawn(config: ShipperConfig) -> Result<Self, ShipError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ShipError::Client(e.to_string()))?;

        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity.max(1));

        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(receiver, client))
            .map_err(|e| ShipError::Spawn(e.to_string()))?;

        tracing::debug!(
            queue_capacity = config.queue_capacity,
            timeout_secs = config.timeout.as_secs(),
            "Log shipper started"
        );

        Ok(Self {
            sender,
            config,
            dropped_count: AtomicU64::new(0),
        })
    }

    /// A shipper without a worker; the caller owns the receiving end.
    #[cfg(test)]
    pub(crate) fn detached(config: ShipperConfig) -> (Self, Receiver<ShipRequest>) {
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        let shipper = Self {
            sender,
            config,
            dropped_count: AtomicU64::new(0),
        };
        (shipper, receiver)
    }

    /// Queue a record for delivery without blocking.
    pub fn push(&self, request: ShipRequest) -> Result<(), ShipError> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let count = self.dropped_count.fetch_add(1, Ordering::Relaxed);
                // Every 100 drops, to avoid log spam
                if count.is_multiple_of(100) {
                    tracing::warn!(
                        dropped_count = count + 1,
                        queue_capacity = self.config.queue_capacity,
                        "Log queue overflow: dropping records (collector may be slow/unavailable)"
                    );
                }
                Err(ShipError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(ShipError::Disconnected),
        }
    }

    /// Get the count of records dropped due to queue overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogShipper")
            .field("config", &self.config)
            .field("queued", &self.sender.len())
            .field("dropped_count", &self.dropped_count())
            .finish()
    }
}

fn run_worker(receiver: Receiver<ShipRequest>, client: reqwest::Client) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start log shipper runtime; log shipping disabled");
            return;
        }
    };

    while let Ok(request) = receiver.recv() {
        runtime.block_on(deliver(&client, request));
    }

    tracing::debug!("Log shipper worker shutting down");
}

async fn deliver(client: &reqwest::Client, request: ShipRequest) {
    let result = client
        .post(&request.endpoint)
        .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(API_KEY_HEADER, request.api_key.as_str())
        .body(request.body)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            tracing::trace!(endpoint = %request.endpoint, "Log record delivered");
        }
        Ok(response) => {
            tracing::warn!(
                endpoint = %request.endpoint,
                status = response.status().as_u16(),
                "Log collector rejected record"
            );
        }
        Err(e) => {
            tracing::warn!(
                endpoint = %request.endpoint,
                error = %e,
                "Failed to deliver log record"
            );
        }
    }
}
