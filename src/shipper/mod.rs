//! Best-effort delivery of NDJSON exchange records to a remote collector.

mod buffer;
mod sink;

pub use buffer::{API_KEY_HEADER, LogShipper, NDJSON_CONTENT_TYPE, ShipRequest, ShipperConfig};
pub use sink::{HttpLogSink, LogSink, ShipError};
