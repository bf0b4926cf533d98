//! Aivory agent configuration
//!
//! Immutable configuration snapshot consumed by the capture pipeline, the
//! interception controller, and the transport controller. Built once at
//! startup by the [`loader`] and read-only thereafter.

use rand::RngExt;
use thiserror::Error;

pub mod loader;
pub mod release;

pub use loader::ConfigSources;
pub use release::ReleaseContext;

/// Default maximum capture recursion depth.
pub const DEFAULT_MAX_CAPTURE_DEPTH: usize = 10;
/// Default cap on captured string length.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 1000;
/// Default cap on captured collection/map entries per node.
pub const DEFAULT_MAX_COLLECTION_SIZE: usize = 100;
/// Default environment name when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Configuration error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No API key was found in any configuration channel.
    #[error("missing API key (set AIVORY_API_KEY or the apikey agent argument)")]
    MissingApiKey,
    /// No backend endpoint was found in any configuration channel.
    #[error("missing backend URL (set AIVORY_BACKEND_URL or the backendurl agent argument)")]
    MissingBackendUrl,
}

/// Immutable agent configuration snapshot.
///
/// Capture limits bound the serializer, the sampling rate gates the
/// interception controller, and the identity fields feed the transport's
/// `register` envelope.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// API key presented during transport registration.
    pub api_key: String,
    /// Duplex ingest endpoint (`ws://` or `wss://`).
    pub backend_url: String,
    /// Deployment environment label (e.g. "production", "staging").
    pub environment: String,
    /// Random per-process agent identity (32 lowercase hex chars).
    pub agent_id: String,
    /// Host name reported during registration.
    pub hostname: String,
    /// Exception sampling rate in `[0, 1]`.
    pub sampling_rate: f64,
    /// Maximum capture recursion depth.
    pub max_capture_depth: usize,
    /// Maximum captured string length.
    pub max_string_length: usize,
    /// Maximum captured elements/entries per collection node.
    pub max_collection_size: usize,
    /// Class-name patterns to instrument (`*`, `prefix.*`, or exact).
    pub include_patterns: Vec<String>,
    /// Class-name patterns to exclude from instrumentation.
    pub exclude_patterns: Vec<String>,
    /// Verbose agent logging.
    pub debug: bool,
    /// Release/deploy context attached to registration and captures.
    pub release_context: Option<ReleaseContext>,
    /// Host runtime tag reported during registration.
    pub runtime_name: String,
    /// Host runtime version reported during registration.
    pub runtime_version: String,
}

impl AgentConfig {
    /// Create a configuration with the given credentials and all limits at
    /// their defaults.
    pub fn new(api_key: impl Into<String>, backend_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            backend_url: backend_url.into(),
            ..Self::default()
        }
    }

    /// Decide whether the current event should be captured.
    ///
    /// Returns `true` when the rate is `>= 1`, `false` when `<= 0`, and
    /// otherwise draws a fresh uniform sample per call.
    pub fn should_sample(&self) -> bool {
        if self.sampling_rate >= 1.0 {
            return true;
        }
        if self.sampling_rate <= 0.0 {
            return false;
        }
        rand::rng().random::<f64>() < self.sampling_rate
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            backend_url: String::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            agent_id: random_agent_id(),
            hostname: "unknown".to_string(),
            sampling_rate: 1.0,
            max_capture_depth: DEFAULT_MAX_CAPTURE_DEPTH,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            max_collection_size: DEFAULT_MAX_COLLECTION_SIZE,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            debug: false,
            release_context: None,
            runtime_name: "rust".to_string(),
            runtime_version: "unknown".to_string(),
        }
    }
}

/// Generate a random 32-hex-char agent identity.
pub fn random_agent_id() -> String {
    let mut rng = rand::rng();
    format!("{:016x}{:016x}", rng.random::<u64>(), rng.random::<u64>())
}
