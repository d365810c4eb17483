//! The error payload the engine emits in place of a non-conforming message.
//!
//! Verdict inference reads this shape back (only `code` matters to it), so
//! changes to it must bump [`ERROR_PAYLOAD_VERSION`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::validation::{SchemaViolation, join_violations};

pub const ERROR_PAYLOAD_VERSION: u32 = 1;

pub const TITLE_ROUTE_NOT_FOUND: &str = "the resource requested could not be found";
pub const TITLE_METHOD_NOT_ALLOWED: &str = "the request method is not allowed for this resource";
pub const TITLE_RESPONSE_STATUS_UNDEFINED: &str = "response status code not defined";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

impl ErrorPayload {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn route_not_found(path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            TITLE_ROUTE_NOT_FOUND,
            format!("no path in the contract matches {path}"),
        )
    }

    pub fn method_not_allowed(method: &http::Method, template: &str) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            TITLE_METHOD_NOT_ALLOWED,
            format!("{method} is not defined for {template}"),
        )
    }

    pub fn bad_request(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, title, detail)
    }

    pub fn unsupported_media_type(content_type: &str) -> Self {
        Self::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "request content type not supported",
            format!("content type {content_type:?} is not declared for this operation"),
        )
    }

    pub fn response_status_undefined(status: u16) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            TITLE_RESPONSE_STATUS_UNDEFINED,
            format!("status {status} is not declared for this operation"),
        )
    }

    pub fn response_violation(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, title, detail)
    }

    pub fn schema_violation(status: StatusCode, title: &str, violations: &[SchemaViolation]) -> Self {
        Self::new(status, title, join_violations(violations))
    }

    /// Clear `detail` unless debug errors are enabled.
    pub fn redact(mut self, debug_errors: bool) -> Self {
        if !debug_errors {
            self.detail.clear();
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        // Serializing a struct of plain strings and integers cannot fail.
        serde_json::to_vec(self)
            .map(bytes::Bytes::from)
            .unwrap_or_default()
    }
}

impl IntoResponse for ErrorPayload {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Read the numeric `code` of an emitted error payload.
///
/// Returns `None` when the body is not a JSON object or `code` is not an
/// unsigned integer.
pub fn payload_code(body: &[u8]) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("code")?.as_u64()
}
