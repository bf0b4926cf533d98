//! Configuration loader.
//!
//! Resolves the agent configuration from three channels: comma-separated
//! agent arguments (`k=v`), process properties (`aivory.*`), and environment
//! variables (`AIVORY_*`). Later channels win. Sources are injected as plain
//! maps so loading is deterministic and testable; [`ConfigSources::from_process_env`]
//! snapshots the real environment for production use.

use std::collections::HashMap;

use tracing::warn;

use crate::release::{self, ExplicitRelease};
use crate::{AgentConfig, ConfigError};

// ── ConfigSources ────────────────────────────────────────────────────────────

/// The three configuration channels, in ascending override order.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Comma-separated `k=v` agent arguments (weakest channel).
    pub agent_args: Option<String>,
    /// Process properties keyed `aivory.*`.
    pub properties: HashMap<String, String>,
    /// Environment variables keyed `AIVORY_*` (strongest channel).
    pub env: HashMap<String, String>,
}

impl ConfigSources {
    /// Sources with a snapshot of the real process environment and no agent
    /// arguments or properties.
    pub fn from_process_env() -> Self {
        Self {
            agent_args: None,
            properties: HashMap::new(),
            env: std::env::vars().collect(),
        }
    }

    /// Attach an agent-argument string (`"apikey=...,env=staging"`).
    pub fn with_agent_args(mut self, args: impl Into<String>) -> Self {
        self.agent_args = Some(args.into());
        self
    }

    /// Resolve the full configuration.
    ///
    /// Fails only when no API key or no backend URL is present; every other
    /// malformed value falls back to its default with a warning.
    pub fn load(&self) -> Result<AgentConfig, ConfigError> {
        let args = parse_agent_args(self.agent_args.as_deref().unwrap_or(""));

        let api_key = self
            .resolve(&args, &["apikey"], "aivory.api.key", "AIVORY_API_KEY")
            .ok_or(ConfigError::MissingApiKey)?;
        let backend_url = self
            .resolve(&args, &["backendurl"], "aivory.backend.url", "AIVORY_BACKEND_URL")
            .ok_or(ConfigError::MissingBackendUrl)?;

        let mut config = AgentConfig::new(api_key, backend_url);

        if let Some(env) = self.resolve(
            &args,
            &["environment", "env"],
            "aivory.environment",
            "AIVORY_ENVIRONMENT",
        ) {
            config.environment = env;
        }
        if let Some(rate) = self.resolve(
            &args,
            &["samplingrate"],
            "aivory.sampling.rate",
            "AIVORY_SAMPLING_RATE",
        ) {
            config.sampling_rate = parse_or(&rate, "sampling rate", config.sampling_rate);
            config.sampling_rate = config.sampling_rate.clamp(0.0, 1.0);
        }
        if let Some(depth) = self.resolve(
            &args,
            &["maxdepth"],
            "aivory.capture.maxDepth",
            "AIVORY_MAX_DEPTH",
        ) {
            config.max_capture_depth = parse_or(&depth, "max depth", config.max_capture_depth);
        }
        if let Some(len) = self.resolve(
            &args,
            &[],
            "aivory.capture.maxStringLength",
            "AIVORY_MAX_STRING_LENGTH",
        ) {
            config.max_string_length = parse_or(&len, "max string length", config.max_string_length);
        }
        if let Some(size) = self.resolve(
            &args,
            &[],
            "aivory.capture.maxCollectionSize",
            "AIVORY_MAX_COLLECTION_SIZE",
        ) {
            config.max_collection_size =
                parse_or(&size, "max collection size", config.max_collection_size);
        }
        if let Some(include) = self.resolve(&args, &["include"], "aivory.include", "AIVORY_INCLUDE")
        {
            config.include_patterns = split_patterns(&include);
        }
        if let Some(exclude) = self.resolve(&args, &["exclude"], "aivory.exclude", "AIVORY_EXCLUDE")
        {
            config.exclude_patterns = split_patterns(&exclude);
        }
        if let Some(debug) = self.resolve(&args, &["debug"], "aivory.debug", "AIVORY_DEBUG") {
            config.debug = matches!(debug.as_str(), "true" | "1" | "yes");
        }

        config.hostname = self
            .env
            .get("HOSTNAME")
            .or_else(|| self.env.get("COMPUTERNAME"))
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let explicit = ExplicitRelease {
            release: self.resolve(&args, &["release"], "aivory.release", "AIVORY_RELEASE"),
            version: self.resolve(&args, &["version"], "aivory.version", "AIVORY_VERSION"),
            commit: self.resolve(&args, &["commit"], "aivory.commit", "AIVORY_COMMIT"),
            branch: self.resolve(&args, &["branch"], "aivory.branch", "AIVORY_BRANCH"),
            repository: self.resolve(&args, &["repository"], "aivory.repository", "AIVORY_REPOSITORY"),
        };
        config.release_context = release::resolve(&explicit, &self.env);

        Ok(config)
    }

    /// Resolve one logical key across the three channels; the environment
    /// wins over properties, properties win over agent arguments. Empty
    /// strings count as absent.
    fn resolve(
        &self,
        args: &HashMap<String, String>,
        arg_keys: &[&str],
        prop_key: &str,
        env_key: &str,
    ) -> Option<String> {
        let mut value = arg_keys
            .iter()
            .filter_map(|k| args.get(*k))
            .find(|v| !v.is_empty())
            .cloned();
        if let Some(prop) = self.properties.get(prop_key).filter(|v| !v.is_empty()) {
            value = Some(prop.clone());
        }
        if let Some(env) = self.env.get(env_key).filter(|v| !v.is_empty()) {
            value = Some(env.clone());
        }
        value
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────────────

/// Split a `"k=v,k=v"` agent-argument string into a map.
fn parse_agent_args(args: &str) -> HashMap<String, String> {
    args.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_lowercase(), value.trim().to_string()))
        })
        .collect()
}

/// Split a `;`-separated pattern list, dropping empty segments.
fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(
    raw: &str,
    what: &str,
    default: T,
) -> T {
    match raw.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("ignoring unparseable {what} {raw:?}, keeping {default}");
            default
        }
    }
}
