//! Engine lifecycle: building, caching, and replacing validation engines.
//!
//! One slot per [`ValidationMode`]. The first build for a slot is serialized
//! behind an init mutex with a double-checked read, so concurrent first calls
//! construct exactly one engine; afterwards readers only take a shared lock.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::{
    config::ReinitPolicy,
    engine::{EngineOptions, ValidationEngine},
    error::EngineInitError,
};

/// Longest buffer still considered as a possible file path.
const MAX_PATH_LEN: usize = 4096;

/// What a call wants the engine to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationMode {
    Request,
    Response,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Request => "request",
            ValidationMode::Response => "response",
        }
    }

    /// Request engines check only requests; response engines only responses.
    pub fn options(&self, debug_errors: bool) -> EngineOptions {
        EngineOptions {
            validate_requests: *self == ValidationMode::Request,
            validate_responses: *self == ValidationMode::Response,
            debug_errors,
        }
    }
}

/// Absolute, and free of the characters a one-line JSON or YAML document
/// needs.
fn looks_like_path(candidate: &str) -> bool {
    candidate.starts_with('/') && !candidate.contains([':', '{'])
}

/// Where the OpenAPI document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    Inline(Bytes),
    Path(PathBuf),
}

impl SpecSource {
    /// A single line naming an existing file, or shaped like an absolute
    /// path, is a path; anything else is the document itself.
    ///
    /// An absolute path that does not exist still resolves to a path so the
    /// load fails with a read error instead of a parse error.
    pub fn detect(raw: Bytes) -> Self {
        if raw.len() <= MAX_PATH_LEN
            && let Ok(text) = std::str::from_utf8(&raw)
        {
            let candidate = text.trim();
            if !candidate.is_empty()
                && !candidate.contains('\n')
                && (Path::new(candidate).is_file() || looks_like_path(candidate))
            {
                return SpecSource::Path(PathBuf::from(candidate));
            }
        }
        SpecSource::Inline(raw)
    }

    pub fn load(&self) -> Result<Bytes, EngineInitError> {
        match self {
            SpecSource::Inline(bytes) => Ok(bytes.clone()),
            SpecSource::Path(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|e| EngineInitError::ReadSpec(e, path.clone())),
        }
    }
}

/// Collector credentials for an engine's log sink.
#[derive(Clone, PartialEq, Eq)]
pub struct LogCredentials {
    pub url: String,
    pub token: String,
}

impl LogCredentials {
    /// Both halves must be non-empty for a sink to be wired.
    pub fn new(url: Option<String>, token: Option<String>) -> Option<Self> {
        match (url, token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Some(Self { url, token })
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for LogCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCredentials")
            .field("url", &self.url)
            .field("token", &"****")
            .finish()
    }
}

/// Everything that goes into building one engine.
#[derive(Debug, Clone)]
pub struct SpecConfiguration {
    pub source: SpecSource,
    pub log: Option<LogCredentials>,
    pub mode: ValidationMode,
    pub debug_errors: bool,
}

impl SpecConfiguration {
    /// SHA-256 over every field, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match &self.source {
            SpecSource::Inline(bytes) => {
                hasher.update(b"inline\0");
                hasher.update(bytes);
            }
            SpecSource::Path(path) => {
                hasher.update(b"path\0");
                hasher.update(path.as_os_str().as_encoded_bytes());
            }
        }
        hasher.update(b"\0log\0");
        if let Some(log) = &self.log {
            hasher.update(log.url.as_bytes());
            hasher.update(b"\0");
            hasher.update(log.token.as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(self.mode.as_str().as_bytes());
        hasher.update([u8::from(self.debug_errors)]);
        hex::encode(hasher.finalize())
    }
}

struct CachedEngine {
    fingerprint: String,
    engine: Arc<ValidationEngine>,
}

#[derive(Default)]
struct EngineSlot {
    current: RwLock<Option<CachedEngine>>,
    init: Mutex<()>,
}

impl EngineSlot {
    fn reusable(&self, policy: ReinitPolicy, config: &SpecConfiguration) -> Option<Arc<ValidationEngine>> {
        let current = self.current.read();
        let cached = current.as_ref()?;
        match policy {
            ReinitPolicy::FirstWriteWins => Some(Arc::clone(&cached.engine)),
            ReinitPolicy::RebuildOnChange => (cached.fingerprint == config.fingerprint())
                .then(|| Arc::clone(&cached.engine)),
        }
    }
}

/// Process-wide cache of validation engines.
pub struct EngineRegistry {
    policy: ReinitPolicy,
    request: EngineSlot,
    response: EngineSlot,
}

impl EngineRegistry {
    pub fn new(policy: ReinitPolicy) -> Self {
        Self {
            policy,
            request: EngineSlot::default(),
            response: EngineSlot::default(),
        }
    }

    pub fn policy(&self) -> ReinitPolicy {
        self.policy
    }

    fn slot(&self, mode: ValidationMode) -> &EngineSlot {
        match mode {
            ValidationMode::Request => &self.request,
            ValidationMode::Response => &self.response,
        }
    }

    /// The engine currently cached for `mode`, if any.
    pub fn current(&self, mode: ValidationMode) -> Option<Arc<ValidationEngine>> {
        self.slot(mode)
            .current
            .read()
            .as_ref()
            .map(|cached| Arc::clone(&cached.engine))
    }

    /// Return the cached engine for `config.mode`, building it with `build`
    /// when the slot is empty (or stale under rebuild-on-change).
    ///
    /// A failed build leaves the slot as it was, so a later call retries.
    pub fn acquire<F>(
        &self,
        config: &SpecConfiguration,
        build: F,
    ) -> Result<Arc<ValidationEngine>, EngineInitError>
    where
        F: FnOnce(&SpecConfiguration) -> Result<ValidationEngine, EngineInitError>,
    {
        let slot = self.slot(config.mode);
        if let Some(engine) = slot.reusable(self.policy, config) {
            return Ok(engine);
        }

        let _guard = slot.init.lock();
        // Another caller may have finished building while we waited.
        if let Some(engine) = slot.reusable(self.policy, config) {
            return Ok(engine);
        }

        let fingerprint = config.fingerprint();
        let engine = Arc::new(build(config)?);

        let replaced = slot
            .current
            .write()
            .replace(CachedEngine {
                fingerprint: fingerprint.clone(),
                engine: Arc::clone(&engine),
            })
            .is_some();
        tracing::info!(
            mode = config.mode.as_str(),
            fingerprint = &fingerprint[..12],
            replaced,
            "Validation engine cached"
        );
        Ok(engine)
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("policy", &self.policy)
            .field("request", &self.current(ValidationMode::Request).is_some())
            .field("response", &self.current(ValidationMode::Response).is_some())
            .finish()
    }
}
