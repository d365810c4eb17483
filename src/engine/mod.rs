//! The validation engine: an OpenAPI route table plus the middleware that
//! enforces it in front of a downstream service.

mod checks;
mod middleware;
mod payload;
mod record;

use std::{convert::Infallible, sync::Arc};

use axum::{extract::Request, response::Response};
pub use payload::{
    ERROR_PAYLOAD_VERSION, ErrorPayload, TITLE_METHOD_NOT_ALLOWED, TITLE_RESPONSE_STATUS_UNDEFINED,
    TITLE_ROUTE_NOT_FOUND, payload_code,
};
pub use record::{LOG_RECORD_VERSION, LogRecord, RequestRecord, ResponseRecord};
use tower::{Layer, Service, util::BoxCloneService};

use crate::{
    error::EngineInitError,
    shipper::LogSink,
    validation::{OpenApiDocument, RouteTable},
};

/// The engine wrapped around a downstream, ready for dispatch.
pub type EngineService = BoxCloneService<Request, Response, Infallible>;

/// Which halves of an exchange the engine checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub validate_requests: bool,
    pub validate_responses: bool,
    /// Put schema error messages into the payload `detail`.
    pub debug_errors: bool,
}

/// Where exchange records go.
pub struct LogTarget {
    pub sink: Arc<dyn LogSink>,
    pub api_key: String,
}

pub struct ValidationEngine {
    routes: RouteTable,
    options: EngineOptions,
    log: Option<LogTarget>,
}

impl ValidationEngine {
    /// Compile every operation of the document.
    pub fn new(document: &OpenApiDocument, options: EngineOptions) -> Result<Self, EngineInitError> {
        let routes = RouteTable::build(document)?;
        tracing::info!(
            openapi = document.version(),
            routes = routes.len(),
            validate_requests = options.validate_requests,
            validate_responses = options.validate_responses,
            "Validation engine built"
        );
        Ok(Self {
            routes,
            options,
            log: None,
        })
    }

    /// Parse and compile a JSON or YAML document.
    pub fn from_spec(spec: &[u8], options: EngineOptions) -> Result<Self, EngineInitError> {
        let document = OpenApiDocument::parse(spec)?;
        Self::new(&document, options)
    }

    /// Emit one NDJSON record per dispatch to `sink`.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>, api_key: impl Into<String>) -> Self {
        self.log = Some(LogTarget {
            sink,
            api_key: api_key.into(),
        });
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn has_log_sink(&self) -> bool {
        self.log.is_some()
    }

    /// Put the engine in front of `backend`.
    pub fn wrap<S>(self: &Arc<Self>, backend: S) -> EngineService
    where
        S: Service<Request, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let layer =
            axum::middleware::from_fn_with_state(Arc::clone(self), middleware::enforce_contract);
        BoxCloneService::new(layer.layer(backend))
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("routes", &self.routes.len())
            .field("options", &self.options)
            .field("log_sink", &self.log.as_ref().map(|t| t.sink.name()))
            .finish()
    }
}
