//! The bridge facade the C exports call into.
//!
//! Holds the process-wide state: configuration, the spec source recorded by
//! `create_engine`, the engine registry, and the log shipper. Every method
//! resolves to a verdict or status; nothing here returns a fault to the host.

use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};

use crate::{
    capture::CapturedResponse,
    config::{BridgeConfig, InitFailurePolicy, ReinitPolicy},
    engine::ValidationEngine,
    error::{BridgeError, DecodeError, EngineInitError},
    ffi::codec::decode_string,
    lifecycle::{EngineRegistry, LogCredentials, SpecConfiguration, SpecSource, ValidationMode},
    observability::init_tracing,
    probe::{AllowUndefinedRoutes, ProbeRequest, decode_headers, upstream_response},
    shipper::{HttpLogSink, LogShipper, ShipError, ShipRequest, ShipperConfig},
    verdict::{self, Adjudication},
};

static BRIDGE: Lazy<Bridge> = Lazy::new(Bridge::from_env);

/// Raw buffers of a `validate_request` call.
#[derive(Debug, Clone, Default)]
pub struct RequestCall {
    pub allow_undefined_routes: Option<Bytes>,
    pub body: Option<Bytes>,
    pub path: Option<Bytes>,
    pub method: Option<Bytes>,
    pub headers: Option<Bytes>,
}

impl RequestCall {
    fn decode(self) -> Result<(ProbeRequest, AllowUndefinedRoutes), DecodeError> {
        let headers = decode_headers("headers", self.headers.as_deref())?;
        let probe = ProbeRequest::decode(
            self.method.as_deref(),
            self.path.as_deref(),
            headers,
            self.body,
        )?;
        Ok((probe, AllowUndefinedRoutes::new(self.allow_undefined_routes)))
    }
}

/// Raw buffers of a `validate_response` call.
#[derive(Debug, Clone, Default)]
pub struct ResponseCall {
    pub log_url: Option<Bytes>,
    pub log_token: Option<Bytes>,
    pub allow_undefined_routes: Option<Bytes>,
    pub request_body: Option<Bytes>,
    pub request_headers: Option<Bytes>,
    pub response_body: Option<Bytes>,
    pub response_headers: Option<Bytes>,
    pub path: Option<Bytes>,
    pub status_code: i32,
    pub method: Option<Bytes>,
}

struct DecodedResponseCall {
    probe: ProbeRequest,
    upstream: CapturedResponse,
    log: Option<LogCredentials>,
    allow_undefined: AllowUndefinedRoutes,
}

impl ResponseCall {
    fn decode(self) -> Result<DecodedResponseCall, DecodeError> {
        let log = LogCredentials::new(
            decode_string("log_url", self.log_url.as_ref())?,
            decode_string("log_token", self.log_token.as_ref())?,
        );
        let request_headers = decode_headers("request_headers", self.request_headers.as_deref())?;
        let probe = ProbeRequest::decode(
            self.method.as_deref(),
            self.path.as_deref(),
            request_headers,
            self.request_body,
        )?;
        let response_headers =
            decode_headers("response_headers", self.response_headers.as_deref())?;
        let upstream = upstream_response(self.status_code, response_headers, self.response_body)?;

        Ok(DecodedResponseCall {
            probe,
            upstream,
            log,
            allow_undefined: AllowUndefinedRoutes::new(self.allow_undefined_routes),
        })
    }
}

pub struct Bridge {
    config: BridgeConfig,
    spec: RwLock<Option<SpecSource>>,
    credentials: RwLock<Option<LogCredentials>>,
    engines: EngineRegistry,
    shipper: OnceCell<Arc<LogShipper>>,
    /// Serializes `create_engine` calls.
    create: Mutex<()>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let engines = EngineRegistry::new(config.engine.reinit);
        Self {
            config,
            spec: RwLock::new(None),
            credentials: RwLock::new(None),
            engines,
            shipper: OnceCell::new(),
            create: Mutex::new(()),
        }
    }

    /// Load configuration from `CONTRACT_BRIDGE_CONFIG` and install logging.
    ///
    /// A configuration that fails to load falls back to defaults; the host
    /// keeps running either way.
    pub fn from_env() -> Self {
        let (config, load_error) = match BridgeConfig::from_env() {
            Ok(config) => (config, None),
            Err(e) => (BridgeConfig::default(), Some(e)),
        };

        if let Err(e) = init_tracing(&config.logging) {
            tracing::debug!(error = %e, "Tracing subscriber already installed");
        }
        if let Some(e) = load_error {
            tracing::error!(error = %e, "Failed to load bridge configuration; using defaults");
        }

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            reinit = ?config.engine.reinit,
            on_init_failure = ?config.engine.on_init_failure,
            "Contract bridge initialized"
        );
        Self::new(config)
    }

    /// The process-wide bridge, created on first use.
    pub fn global() -> &'static Bridge {
        &BRIDGE
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Build both engines from `spec`, then record it as the spec source.
    ///
    /// A spec that fails to build is never recorded, so a later call with a
    /// good one still takes effect. Under first-write-wins a spec recorded
    /// earlier is kept.
    pub fn create_engine(
        &self,
        spec: Option<Bytes>,
        log_token: Option<Bytes>,
        log_url: Option<Bytes>,
    ) -> Result<(), BridgeError> {
        let spec = spec.ok_or(EngineInitError::NoSpec)?;
        let credentials = LogCredentials::new(
            decode_string("log_url", log_url.as_ref())?,
            decode_string("log_token", log_token.as_ref())?,
        );

        let _guard = self.create.lock();
        if self.engines.policy() == ReinitPolicy::FirstWriteWins && self.spec.read().is_some() {
            tracing::debug!("Spec already recorded; keeping the first one");
            return Ok(());
        }

        let source = SpecSource::detect(spec);
        for mode in [ValidationMode::Request, ValidationMode::Response] {
            let config = self.configuration(source.clone(), mode, credentials.clone());
            self.engines
                .acquire(&config, |config| self.build_engine(config))
                .inspect_err(|e| tracing::warn!(error = %e, mode = mode.as_str(), "Spec rejected"))?;
        }

        *self.spec.write() = Some(source);
        *self.credentials.write() = credentials;
        Ok(())
    }

    pub fn validate_request(&self, call: RequestCall) -> Adjudication {
        let (probe, allow_undefined) = match call.decode() {
            Ok(decoded) => decoded,
            Err(e) => return Adjudication::malformed_input(&e),
        };

        match self.engine(ValidationMode::Request, None) {
            Ok(engine) => verdict::adjudicate_request(&engine, probe, &allow_undefined),
            Err(e) => self.engine_unavailable(&e, None),
        }
    }

    pub fn validate_response(&self, call: ResponseCall) -> Adjudication {
        let call = match call.decode() {
            Ok(decoded) => decoded,
            Err(e) => return Adjudication::malformed_input(&e),
        };

        match self.engine(ValidationMode::Response, call.log) {
            Ok(engine) => {
                verdict::adjudicate_response(&engine, call.probe, call.upstream, &call.allow_undefined)
            }
            Err(e) => self.engine_unavailable(&e, Some(call.upstream.body)),
        }
    }

    /// Queue a host-formatted record for the collector.
    ///
    /// Falls back to `log_shipping.endpoint` when `url` is absent.
    pub fn ship_logs(
        &self,
        body: Option<Bytes>,
        api_key: Option<Bytes>,
        url: Option<Bytes>,
    ) -> Result<(), BridgeError> {
        let endpoint = decode_string("url", url.as_ref())?
            .or_else(|| self.config.log_shipping.endpoint.clone());
        let api_key = decode_string("api_key", api_key.as_ref())?.unwrap_or_default();

        let result = endpoint
            .ok_or(ShipError::NoEndpoint)
            .and_then(|endpoint| {
                url::Url::parse(&endpoint)
                    .map_err(|_| ShipError::InvalidEndpoint(endpoint.clone()))?;
                self.shipper()?.push(ShipRequest {
                    endpoint,
                    api_key,
                    body: body.unwrap_or_default(),
                })
            });

        result.map_err(|e| {
            tracing::debug!(error = %e, "Log record not shipped");
            BridgeError::Dispatch(e.to_string())
        })
    }

    /// Resolve the engine for `mode`, building it on first use.
    fn engine(
        &self,
        mode: ValidationMode,
        log: Option<LogCredentials>,
    ) -> Result<Arc<ValidationEngine>, EngineInitError> {
        let Some(source) = self.spec_source() else {
            return self.engines.current(mode).ok_or(EngineInitError::NoSpec);
        };

        let log = log.or_else(|| self.credentials.read().clone());
        let config = self.configuration(source, mode, log);
        self.engines.acquire(&config, |config| self.build_engine(config))
    }

    fn configuration(
        &self,
        source: SpecSource,
        mode: ValidationMode,
        log: Option<LogCredentials>,
    ) -> SpecConfiguration {
        // Only the response engine logs, so each exchange is recorded once.
        let log = match mode {
            ValidationMode::Request => None,
            ValidationMode::Response => log,
        };
        SpecConfiguration {
            source,
            log,
            mode,
            debug_errors: self.config.engine.debug_errors,
        }
    }

    fn spec_source(&self) -> Option<SpecSource> {
        self.spec.read().clone().or_else(|| {
            self.config
                .engine
                .spec_path
                .clone()
                .map(SpecSource::Path)
        })
    }

    fn build_engine(&self, config: &SpecConfiguration) -> Result<ValidationEngine, EngineInitError> {
        let spec = config.source.load()?;
        let engine = ValidationEngine::from_spec(&spec, config.mode.options(config.debug_errors))?;

        let Some(log) = &config.log else {
            return Ok(engine);
        };
        match self.shipper() {
            Ok(shipper) => {
                let sink = HttpLogSink::new(shipper, log.url.clone());
                Ok(engine.with_log_sink(Arc::new(sink), log.token.clone()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Log shipper unavailable; engine built without logging");
                Ok(engine)
            }
        }
    }

    fn shipper(&self) -> Result<Arc<LogShipper>, ShipError> {
        self.shipper
            .get_or_try_init(|| {
                LogShipper::spawn(ShipperConfig::from(&self.config.log_shipping)).map(Arc::new)
            })
            .cloned()
    }

    fn engine_unavailable(&self, error: &EngineInitError, supplied: Option<Bytes>) -> Adjudication {
        match self.config.engine.on_init_failure {
            InitFailurePolicy::FailClosed => {
                tracing::error!(error = %error, "Validation engine unavailable");
                Adjudication::engine_unavailable(error)
            }
            InitFailurePolicy::FailOpen => {
                tracing::warn!(error = %error, "Validation engine unavailable; passing traffic unvalidated");
                Adjudication::pass(supplied)
            }
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("spec", &self.spec.read().is_some())
            .field("engines", &self.engines)
            .field("shipper", &self.shipper.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;
    use crate::{
        config::EngineConfig,
        engine::ErrorPayload,
        shipper::API_KEY_HEADER,
        tests::fixtures::USERS_SPEC,
        verdict::{TITLE_MALFORMED_INPUT, Verdict},
    };

    fn bridge(engine: EngineConfig) -> Bridge {
        Bridge::new(BridgeConfig {
            engine,
            ..Default::default()
        })
    }

    fn spec() -> Option<Bytes> {
        Some(Bytes::from_static(USERS_SPEC.as_bytes()))
    }

    fn bytes(s: &'static str) -> Option<Bytes> {
        Some(Bytes::from_static(s.as_bytes()))
    }

    fn get_user(id: &'static str) -> RequestCall {
        RequestCall {
            path: Some(Bytes::from(format!("/users/{id}"))),
            method: bytes("GET"),
            ..Default::default()
        }
    }

    fn user_response(body: &'static str) -> ResponseCall {
        ResponseCall {
            response_body: bytes(body),
            response_headers: bytes(r#"{"Content-Type":"application/json"}"#),
            path: bytes("/users/7"),
            status_code: 200,
            method: bytes("GET"),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_engine_builds_both_modes() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();
        assert!(bridge.engines.current(ValidationMode::Request).is_some());
        assert!(bridge.engines.current(ValidationMode::Response).is_some());
    }

    #[test]
    fn test_create_engine_with_bad_spec_fails() {
        let bridge = bridge(EngineConfig::default());
        let err = bridge
            .create_engine(bytes("openapi: [unterminated"), None, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::EngineInit(_)), "{err}");
    }

    #[test]
    fn test_create_engine_without_spec_fails() {
        let bridge = bridge(EngineConfig::default());
        assert!(matches!(
            bridge.create_engine(None, None, None),
            Err(BridgeError::EngineInit(EngineInitError::NoSpec))
        ));
    }

    #[test]
    fn test_validate_request_verdicts() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();

        assert_eq!(bridge.validate_request(get_user("7")), Adjudication::pass(None));
        let failed = bridge.validate_request(get_user("abc"));
        assert_eq!(failed.verdict, Verdict::Fail);
    }

    #[test]
    fn test_validate_response_verdicts() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();

        let passed = bridge.validate_response(user_response(r#"{"id":7}"#));
        assert_eq!(passed.verdict, Verdict::Pass);
        assert_eq!(passed.body, bytes(r#"{"id":7}"#));

        let failed = bridge.validate_response(user_response(r#"{"id":"abc"}"#));
        assert_eq!(failed.verdict, Verdict::Fail);
        let payload: ErrorPayload = serde_json::from_slice(failed.body.as_ref().unwrap()).unwrap();
        assert!(payload.detail.contains("is not of type"), "{}", payload.detail);
    }

    #[test]
    fn test_malformed_headers_fail_naming_field() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();

        let result = bridge.validate_request(RequestCall {
            headers: bytes("{not json"),
            ..get_user("7")
        });
        assert_eq!(result.verdict, Verdict::Fail);
        let payload: ErrorPayload = serde_json::from_slice(result.body.as_ref().unwrap()).unwrap();
        assert_eq!(payload.title, TITLE_MALFORMED_INPUT);
        assert!(payload.detail.starts_with("headers:"), "{}", payload.detail);
    }

    #[test]
    fn test_bad_status_code_is_malformed_input() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();

        let result = bridge.validate_response(ResponseCall {
            status_code: 42,
            ..user_response("{}")
        });
        assert_eq!(result.verdict, Verdict::Fail);
    }

    #[test]
    fn test_no_spec_fail_closed_is_unavailable() {
        let bridge = bridge(EngineConfig::default());
        let result = bridge.validate_request(get_user("7"));
        assert_eq!(result.verdict, Verdict::EngineUnavailable);
    }

    #[test]
    fn test_no_spec_fail_open_passes_supplied_body() {
        let bridge = bridge(EngineConfig {
            on_init_failure: InitFailurePolicy::FailOpen,
            ..Default::default()
        });

        assert_eq!(bridge.validate_request(get_user("abc")), Adjudication::pass(None));
        let result = bridge.validate_response(user_response(r#"{"id":"abc"}"#));
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.body, bytes(r#"{"id":"abc"}"#));
    }

    #[test]
    fn test_spec_path_from_config_builds_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let spec_path = dir.path().join("spec.json");
        std::fs::write(&spec_path, USERS_SPEC).unwrap();

        let bridge = bridge(EngineConfig {
            spec_path: Some(spec_path),
            ..Default::default()
        });
        assert!(bridge.engines.current(ValidationMode::Request).is_none());
        assert_eq!(bridge.validate_request(get_user("7")).verdict, Verdict::Pass);
        assert!(bridge.engines.current(ValidationMode::Request).is_some());
    }

    #[test]
    fn test_first_write_wins_keeps_first_spec() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();
        bridge
            .create_engine(
                bytes(r#"{"openapi":"3.0.0","paths":{}}"#),
                None,
                None,
            )
            .unwrap();

        assert_eq!(bridge.validate_request(get_user("7")).verdict, Verdict::Pass);
    }

    #[test]
    fn test_rebuild_on_change_uses_new_spec() {
        let bridge = bridge(EngineConfig {
            reinit: ReinitPolicy::RebuildOnChange,
            ..Default::default()
        });
        bridge.create_engine(spec(), None, None).unwrap();
        bridge
            .create_engine(
                bytes(r#"{"openapi":"3.0.0","paths":{}}"#),
                None,
                None,
            )
            .unwrap();

        let result = bridge.validate_request(get_user("7"));
        assert_eq!(result.verdict, Verdict::Fail);
        let payload: ErrorPayload = serde_json::from_slice(result.body.as_ref().unwrap()).unwrap();
        assert_eq!(payload.code, 404);
    }

    #[test]
    fn test_rejected_spec_is_not_recorded() {
        let bridge = bridge(EngineConfig::default());
        assert!(
            bridge
                .create_engine(bytes("openapi: [unterminated"), None, None)
                .is_err()
        );
        assert_eq!(bridge.spec_source(), None);

        bridge.create_engine(spec(), None, None).unwrap();
        assert_eq!(bridge.validate_request(get_user("7")), Adjudication::pass(None));
        assert_eq!(
            bridge.validate_response(user_response(r#"{"id":7}"#)).verdict,
            Verdict::Pass
        );
    }

    #[test]
    fn test_rebuild_on_change_keeps_last_good_spec() {
        let bridge = bridge(EngineConfig {
            reinit: ReinitPolicy::RebuildOnChange,
            ..Default::default()
        });
        bridge.create_engine(spec(), None, None).unwrap();
        assert!(
            bridge
                .create_engine(bytes("openapi: [unterminated"), None, None)
                .is_err()
        );

        assert_eq!(bridge.spec_source(), Some(SpecSource::detect(spec().unwrap())));
        assert_eq!(bridge.validate_request(get_user("7")), Adjudication::pass(None));
        assert_eq!(bridge.validate_request(get_user("abc")).verdict, Verdict::Fail);
    }

    #[test]
    fn test_missing_spec_file_is_read_error() {
        let bridge = bridge(EngineConfig::default());
        let err = bridge
            .create_engine(bytes("/definitely/not/here.yaml"), None, None)
            .unwrap_err();
        assert!(
            matches!(err, BridgeError::EngineInit(EngineInitError::ReadSpec(_, _))),
            "{err}"
        );
    }

    #[test]
    fn test_response_without_headers_checks_declared_json() {
        let bridge = bridge(EngineConfig::default());
        bridge.create_engine(spec(), None, None).unwrap();

        let passed = bridge.validate_response(ResponseCall {
            response_headers: None,
            ..user_response(r#"{"id":7}"#)
        });
        assert_eq!(passed.verdict, Verdict::Pass);
        assert_eq!(passed.body, bytes(r#"{"id":7}"#));

        let failed = bridge.validate_response(ResponseCall {
            response_headers: None,
            ..user_response(r#"{"id":"abc"}"#)
        });
        assert_eq!(failed.verdict, Verdict::Fail);
        let payload: ErrorPayload = serde_json::from_slice(failed.body.as_ref().unwrap()).unwrap();
        assert!(payload.detail.contains("is not of type"), "{}", payload.detail);
    }

    #[test]
    fn test_ship_logs_without_endpoint_fails() {
        let bridge = bridge(EngineConfig::default());
        assert!(bridge.ship_logs(bytes("{}\n"), bytes("k"), None).is_err());
        assert!(
            bridge
                .ship_logs(bytes("{}\n"), bytes("k"), bytes("not a url"))
                .is_err()
        );
    }

    async fn wait_for_requests(server: &MockServer, expected: usize) -> Vec<wiremock::Request> {
        for _ in 0..100 {
            let received = server.received_requests().await.unwrap_or_default();
            if received.len() >= expected {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("collector did not receive {expected} request(s) in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_response_engine_ships_exchange_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/bulk"))
            .and(header(API_KEY_HEADER, "token-1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let bridge = bridge(EngineConfig::default());
        bridge
            .create_engine(
                spec(),
                bytes("token-1"),
                Some(Bytes::from(format!("{}/logs/bulk", server.uri()))),
            )
            .unwrap();
        assert!(
            bridge
                .engines
                .current(ValidationMode::Response)
                .unwrap()
                .has_log_sink()
        );
        assert!(
            !bridge
                .engines
                .current(ValidationMode::Request)
                .unwrap()
                .has_log_sink()
        );

        let result = bridge.validate_response(user_response(r#"{"id":7}"#));
        assert_eq!(result.verdict, Verdict::Pass);

        let received = wait_for_requests(&server, 1).await;
        let record: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(record["request"]["resource"], "/users/{id}");
        assert_eq!(record["response"]["statusCode"], 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ship_logs_posts_host_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let bridge = bridge(EngineConfig::default());
        bridge
            .ship_logs(
                bytes("{\"host\":true}\n"),
                bytes("k"),
                Some(Bytes::from(format!("{}/logs", server.uri()))),
            )
            .unwrap();

        let received = wait_for_requests(&server, 1).await;
        assert_eq!(received[0].body, b"{\"host\":true}\n");
    }
}
