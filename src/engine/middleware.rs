//! The contract-enforcing middleware.
//!
//! Runs as an axum `from_fn_with_state` layer in front of any downstream
//! service. A conforming exchange passes through unchanged; anything else is
//! replaced by an [`ErrorPayload`] response.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, Method, Uri, Version, header::CONTENT_TYPE};
use http_body_util::BodyExt;

use super::{
    ValidationEngine,
    checks::{check_request, check_response},
    payload::ErrorPayload,
    record::{LogRecord, RequestRecord, ResponseRecord},
};
use crate::{capture::EmittedResponse, validation::RouteMatch};

/// What the middleware remembers about the inbound request for logging.
struct Exchange {
    started_at: DateTime<Utc>,
    timer: Instant,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    resource: String,
}

pub(super) async fn enforce_contract(
    State(engine): State<Arc<ValidationEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = Utc::now();
    let timer = Instant::now();

    let (parts, body) = request.into_parts();
    let request_body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            return engine
                .error_response(ErrorPayload::bad_request("request body unreadable", e.to_string()))
                .into_response();
        }
    };

    let mut exchange = Exchange {
        started_at,
        timer,
        method: parts.method.clone(),
        uri: parts.uri.clone(),
        version: parts.version,
        headers: parts.headers.clone(),
        body: request_body.clone(),
        resource: String::new(),
    };

    let (operation, path_params) = match engine.routes.lookup(&parts.method, parts.uri.path()) {
        RouteMatch::Matched {
            operation,
            path_params,
        } => (operation, path_params),
        RouteMatch::MethodNotAllowed { template } => {
            exchange.resource = template.to_string();
            let payload = ErrorPayload::method_not_allowed(&parts.method, template);
            return finish(&engine, &exchange, engine.error_response(payload));
        }
        RouteMatch::NotFound => {
            let payload = ErrorPayload::route_not_found(parts.uri.path());
            return finish(&engine, &exchange, engine.error_response(payload));
        }
    };
    exchange.resource = operation.template.clone();

    if engine.options.validate_requests
        && let Err(payload) = check_request(
            operation,
            &path_params,
            &parts.uri,
            &parts.headers,
            &request_body,
        )
    {
        tracing::debug!(
            method = %parts.method,
            resource = %operation.template,
            title = %payload.title,
            "Request violates contract"
        );
        return finish(&engine, &exchange, engine.error_response(payload));
    }

    let response = next
        .run(Request::from_parts(parts, Body::from(request_body)))
        .await;

    let (response_parts, response_body) = response.into_parts();
    let response_body = match response_body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let payload = ErrorPayload::response_violation("response body unreadable", e.to_string());
            return finish(&engine, &exchange, engine.error_response(payload));
        }
    };

    if engine.options.validate_responses
        && let Err(payload) = check_response(
            operation,
            response_parts.status,
            &response_parts.headers,
            &response_body,
        )
    {
        tracing::debug!(
            method = %exchange.method,
            resource = %exchange.resource,
            status = response_parts.status.as_u16(),
            title = %payload.title,
            "Response violates contract"
        );
        return finish(&engine, &exchange, engine.error_response(payload));
    }

    let emitted = EmittedResponse {
        status: response_parts.status,
        headers: response_parts.headers,
        body: response_body,
    };
    finish(&engine, &exchange, emitted)
}

/// Hand the exchange to the log sink, then turn it into a response.
fn finish(engine: &ValidationEngine, exchange: &Exchange, emitted: EmittedResponse) -> Response {
    if let Some(target) = &engine.log {
        let record = LogRecord::new(
            exchange.started_at,
            exchange.timer.elapsed(),
            RequestRecord::capture(
                &exchange.method,
                &exchange.uri,
                exchange.version,
                &exchange.headers,
                &exchange.resource,
                &exchange.body,
            ),
            ResponseRecord::capture(emitted.status, &emitted.headers, &emitted.body),
        );
        match record.to_ndjson() {
            Ok(line) => target.sink.emit(line, &target.api_key),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize log record"),
        }
    }
    emitted.into_response()
}

impl ValidationEngine {
    /// Build the emitted response for a contract violation.
    pub(super) fn error_response(&self, payload: ErrorPayload) -> EmittedResponse {
        let payload = payload.redact(self.options.debug_errors);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        EmittedResponse {
            status: payload.status(),
            headers,
            body: payload.to_bytes(),
        }
    }
}

impl IntoResponse for EmittedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
