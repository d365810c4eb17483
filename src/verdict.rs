//! Verdict inference.
//!
//! The engine never says "valid" or "invalid". Instead it either forwards to
//! the [`CaptureBackend`] untouched or replaces the exchange with its own
//! error payload. Running a probe through it and diffing what came out
//! against what went in recovers the verdict.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::{
    capture::{CaptureBackend, CapturedResponse, EmittedResponse},
    engine::{ErrorPayload, ValidationEngine, payload_code},
    error::{BridgeError, DecodeError, EngineInitError},
    probe::{AllowUndefinedRoutes, ProbeRequest},
};

pub const TITLE_MALFORMED_INPUT: &str = "malformed bridge input";
pub const TITLE_DISPATCH_FAILED: &str = "dispatch failed";
pub const TITLE_ENGINE_UNAVAILABLE: &str = "validation engine unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    EngineUnavailable,
}

/// A verdict and the body that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjudication {
    pub verdict: Verdict,
    pub body: Option<Bytes>,
}

impl Adjudication {
    pub fn pass(body: Option<Bytes>) -> Self {
        Self {
            verdict: Verdict::Pass,
            body: body.filter(|b| !b.is_empty()),
        }
    }

    pub fn fail(body: Bytes) -> Self {
        Self {
            verdict: Verdict::Fail,
            body: Some(body),
        }
    }

    /// A host buffer could not be decoded.
    pub fn malformed_input(error: &DecodeError) -> Self {
        tracing::debug!(field = error.field(), error = %error, "Rejecting malformed bridge input");
        Self::fail(
            ErrorPayload::new(StatusCode::BAD_REQUEST, TITLE_MALFORMED_INPUT, error.to_string())
                .to_bytes(),
        )
    }

    /// Dispatching through the engine failed.
    pub fn dispatch_failed(error: &BridgeError) -> Self {
        tracing::warn!(error = %error, "Validation dispatch failed");
        Self::fail(
            ErrorPayload::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                TITLE_DISPATCH_FAILED,
                error.to_string(),
            )
            .to_bytes(),
        )
    }

    /// No engine could be built and the policy is to fail closed.
    pub fn engine_unavailable(error: &EngineInitError) -> Self {
        Self {
            verdict: Verdict::EngineUnavailable,
            body: Some(
                ErrorPayload::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    TITLE_ENGINE_UNAVAILABLE,
                    error.to_string(),
                )
                .to_bytes(),
            ),
        }
    }
}

/// Run `probe` through `engine` in front of `backend` and collect what comes
/// out. Drives the future on the calling thread.
pub fn dispatch(
    engine: &Arc<ValidationEngine>,
    probe: ProbeRequest,
    backend: CaptureBackend,
) -> Result<EmittedResponse, BridgeError> {
    let service = engine.wrap(backend);
    let request = probe.into_request();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        futures::executor::block_on(async move {
            let response = service
                .oneshot(request)
                .await
                .unwrap_or_else(|never| match never {});
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| BridgeError::Dispatch(format!("collecting emitted body: {e}")))?
                .to_bytes();
            Ok::<_, BridgeError>(EmittedResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        })
    }));

    outcome.unwrap_or_else(|_| Err(BridgeError::Dispatch("validation engine panicked".to_string())))
}

/// Validate a request against an engine that checks requests.
///
/// The backend replays an empty `200`; anything but an empty body coming
/// back means the engine rejected the request.
pub fn adjudicate_request(
    engine: &Arc<ValidationEngine>,
    probe: ProbeRequest,
    allow_undefined: &AllowUndefinedRoutes,
) -> Adjudication {
    let placeholder = CapturedResponse::placeholder();
    let backend = CaptureBackend::new(placeholder.clone());

    let emitted = match dispatch(engine, probe, backend) {
        Ok(emitted) => emitted,
        Err(e) => return Adjudication::dispatch_failed(&e),
    };

    if emitted.body == placeholder.body {
        return Adjudication::pass(None);
    }
    provisional_fail(&placeholder, emitted, allow_undefined, None)
}

/// Validate an upstream response (and the request that produced it).
///
/// Passes only when the engine let the exact status and body through.
pub fn adjudicate_response(
    engine: &Arc<ValidationEngine>,
    probe: ProbeRequest,
    upstream: CapturedResponse,
    allow_undefined: &AllowUndefinedRoutes,
) -> Adjudication {
    let backend = CaptureBackend::new(upstream.clone());

    let emitted = match dispatch(engine, probe, backend) {
        Ok(emitted) => emitted,
        Err(e) => return Adjudication::dispatch_failed(&e),
    };

    if emitted.status == upstream.status && emitted.body == upstream.body {
        return Adjudication::pass(Some(upstream.body));
    }
    let original = upstream.body.clone();
    provisional_fail(&upstream, emitted, allow_undefined, Some(original))
}

/// Classify an exchange the engine altered, applying the undefined-route
/// exception when the caller opted in.
fn provisional_fail(
    supplied: &CapturedResponse,
    emitted: EmittedResponse,
    allow_undefined: &AllowUndefinedRoutes,
    override_body: Option<Bytes>,
) -> Adjudication {
    match allow_undefined.resolve() {
        Ok(true) if payload_code(&emitted.body) == Some(404) => {
            tracing::debug!("Undefined route allowed through");
            return Adjudication::pass(override_body);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed allow-undefined-routes flag");
        }
    }

    if emitted.body.is_empty() {
        // The engine changed the status but said nothing; describe it.
        let payload = ErrorPayload::new(
            emitted.status,
            "validation engine altered the exchange",
            format!(
                "expected status {}, engine emitted {} with an empty body",
                supplied.status.as_u16(),
                emitted.status.as_u16()
            ),
        );
        return Adjudication::fail(payload.to_bytes());
    }
    Adjudication::fail(emitted.body)
}
