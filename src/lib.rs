//! OpenAPI contract enforcement for a host web server.
//!
//! The host (typically an nginx module) loads this library and calls the
//! `contract_bridge_*` functions in [`ffi`] for each request and response.
//! Each call runs the exchange through a [`ValidationEngine`] placed in front
//! of a [`CaptureBackend`], then infers the verdict by comparing what came out
//! with what went in.

pub mod bridge;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod lifecycle;
pub mod observability;
pub mod probe;
pub mod shipper;
pub mod validation;
pub mod verdict;

#[cfg(test)]
mod tests;

pub use bridge::{Bridge, RequestCall, ResponseCall};
pub use capture::{CaptureBackend, CapturedResponse, EmittedResponse};
pub use config::BridgeConfig;
pub use engine::{EngineOptions, ErrorPayload, ValidationEngine};
pub use error::{BridgeError, DecodeError, EngineInitError};
pub use ffi::codec::ValidationResult;
pub use lifecycle::{EngineRegistry, SpecConfiguration, SpecSource, ValidationMode};
pub use verdict::{Adjudication, Verdict};
