use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Validation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// OpenAPI document to load when the host never calls
    /// `contract_bridge_create_engine`.
    #[serde(default)]
    pub spec_path: Option<PathBuf>,

    /// Include schema error details in the engine's error payloads.
    #[serde(default = "default_true")]
    pub debug_errors: bool,

    /// What a validate call answers when no engine can be built.
    #[serde(default)]
    pub on_init_failure: InitFailurePolicy,

    /// Whether a differing configuration replaces an already-built engine.
    #[serde(default)]
    pub reinit: ReinitPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spec_path: None,
            debug_errors: true,
            on_init_failure: InitFailurePolicy::default(),
            reinit: ReinitPolicy::default(),
        }
    }
}

/// Verdict policy when the validation engine cannot be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitFailurePolicy {
    /// Let traffic through unvalidated and log a warning.
    FailOpen,
    /// Report the engine as unavailable (non-zero verdict).
    #[default]
    FailClosed,
}

/// Re-initialization policy for a cached engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinitPolicy {
    /// The first successfully built engine serves the process lifetime.
    #[default]
    FirstWriteWins,
    /// Rebuild when a call's configuration fingerprint differs from the cached one.
    RebuildOnChange,
}

fn default_true() -> bool {
    true
}
