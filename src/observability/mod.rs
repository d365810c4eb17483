//! Observability: structured diagnostic logging for the bridge.

mod tracing_init;

pub use tracing_init::*;
