//! Error types for the bridge.
//!
//! Nothing here ever crosses the C boundary as a fault: the bridge facade
//! turns every variant into a verdict before returning to the host.

use std::path::PathBuf;

/// A buffer handed over by the host could not be turned into a semantic value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{field}: not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("{field}: malformed header JSON: {source}")]
    MalformedHeaders {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field}: invalid header name {name:?}")]
    InvalidHeaderName { field: &'static str, name: String },

    #[error("{field}: invalid value for header {name:?}")]
    InvalidHeaderValue { field: &'static str, name: String },

    #[error("method: invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("path: invalid request target {0:?}")]
    InvalidPath(String),

    #[error("status_code: {0} is not a valid HTTP status")]
    InvalidStatus(i32),

    #[error("{field}: unrecognised flag value {value:?}")]
    InvalidFlag { field: &'static str, value: String },
}

impl DecodeError {
    /// Name of the boundary parameter that failed to decode.
    pub fn field(&self) -> &'static str {
        match self {
            DecodeError::InvalidUtf8 { field }
            | DecodeError::MalformedHeaders { field, .. }
            | DecodeError::InvalidHeaderName { field, .. }
            | DecodeError::InvalidHeaderValue { field, .. }
            | DecodeError::InvalidFlag { field, .. } => field,
            DecodeError::InvalidMethod(_) => "method",
            DecodeError::InvalidPath(_) => "path",
            DecodeError::InvalidStatus(_) => "status_code",
        }
    }
}

/// The validation engine could not be built from the supplied configuration.
#[derive(Debug, thiserror::Error)]
pub enum EngineInitError {
    #[error("no OpenAPI document has been supplied")]
    NoSpec,

    #[error("failed to read OpenAPI document at {1}: {0}")]
    ReadSpec(#[source] std::io::Error, PathBuf),

    #[error("failed to parse OpenAPI document: {0}")]
    ParseSpec(String),

    #[error("unsupported OpenAPI document: {0}")]
    Unsupported(String),

    #[error("failed to compile schema at {location}: {message}")]
    Schema { location: String, message: String },
}

/// Top-level bridge error, one variant per failure class.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    EngineInit(#[from] EngineInitError),

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}
