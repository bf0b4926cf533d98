//! Class-name filtering.
//!
//! Resolves the configured include/exclude patterns against fully-qualified
//! class names, and masks off the namespaces the agent must never instrument
//! regardless of configuration: its own code, core runtime packages, and
//! compiler-synthetic classes.

use aivory_config::AgentConfig;

/// The agent's own namespace in the host runtime.
pub const AGENT_NAMESPACE: &str = "io.aivory.";

/// Namespaces masked off unconditionally.
const MASKED_PREFIXES: &[&str] = &[
    AGENT_NAMESPACE,
    "sun.",
    "jdk.",
    "java.lang.reflect.",
    "java.lang.ref.",
    "java.lang.invoke.",
];

/// Include/exclude pattern filter for instrumentation coverage.
#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ClassFilter {
    /// Build a filter from the configured pattern lists.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            include: config.include_patterns.clone(),
            exclude: config.exclude_patterns.clone(),
        }
    }

    /// Decide whether a class should be instrumented.
    ///
    /// Masked namespaces always lose; excludes beat includes; an empty
    /// include list covers everything not excluded.
    pub fn should_instrument(&self, class_name: &str) -> bool {
        if is_masked_namespace(class_name) {
            return false;
        }
        if self.exclude.iter().any(|p| matches_pattern(p, class_name)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|p| matches_pattern(p, class_name))
    }
}

/// Match one pattern: `*` matches everything, `prefix.*` matches the prefix,
/// anything else matches exactly.
pub fn matches_pattern(pattern: &str, class_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return class_name.starts_with(prefix);
    }
    pattern == class_name
}

/// True for the namespaces the agent must never cover: its own code, core
/// runtime internals, reflection/reference machinery, synthetic classes.
pub fn is_masked_namespace(class_name: &str) -> bool {
    MASKED_PREFIXES.iter().any(|p| class_name.starts_with(p))
        || class_name.contains("$$")
}

/// True for frames scrubbed from the prefix of a breakpoint-hit stack:
/// agent-internal code and thread-introspection scaffolding.
pub(crate) fn is_scaffold_frame(class_name: &str) -> bool {
    class_name.starts_with(AGENT_NAMESPACE)
        || class_name.starts_with("java.lang.Thread")
        || class_name.starts_with("jdk.internal.")
}
