//! Agent error type.

use thiserror::Error;

/// Errors surfaced by agent initialization.
///
/// Nothing on the capture or transport paths returns an error to the host;
/// those paths swallow failures internally so the host observes exactly the
/// exception behavior it would without the agent attached.
#[derive(Debug, Error)]
pub enum AgentError {
    /// `init` was called twice in one process.
    #[error("agent already initialized")]
    AlreadyInitialized,
    /// Configuration error
    #[error(transparent)]
    Config(#[from] aivory_config::ConfigError),
}
