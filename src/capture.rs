//! The stand-in downstream the engine forwards to.
//!
//! A [`CaptureBackend`] replays one fixed [`CapturedResponse`]. Whatever the
//! engine lets through is collected into an [`EmittedResponse`]; comparing
//! the two tells whether the engine intervened.

use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use axum::{body::Body, extract::Request, response::Response};
use bytes::Bytes;
use futures::future::{Ready, ready};
use http::{HeaderMap, StatusCode};

/// The ground truth a backend replays: status, headers, and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// `200`, no headers, empty body. Used when only the request is checked.
    pub fn placeholder() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    fn to_response(&self) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = self.status;
        // Headers go on before the body so the engine sees the complete set.
        *response.headers_mut() = self.headers.clone();
        *response.body_mut() = Body::from(self.body.clone());
        response
    }
}

/// What came out of the engine after it wrapped the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct CaptureBackend {
    response: Arc<CapturedResponse>,
    calls: Arc<AtomicUsize>,
}

impl CaptureBackend {
    pub fn new(response: CapturedResponse) -> Self {
        Self {
            response: Arc::new(response),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn response(&self) -> &CapturedResponse {
        &self.response
    }

    /// How many times the engine forwarded to this backend.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl tower::Service<Request> for CaptureBackend {
    type Response = Response;
    type Error = Infallible;
    type Future = Ready<Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: Request) -> Self::Future {
        self.calls.fetch_add(1, Ordering::AcqRel);
        ready(Ok(self.response.to_response()))
    }
}
