//! Aivory runtime observability agent.
//!
//! Attaches to a managed-code process, intercepts exceptions thrown by
//! application code, captures a structured snapshot of the failing execution
//! context, and streams the snapshots over a persistent duplex session to an
//! ingest endpoint. Also serves server-issued non-breaking breakpoints:
//! probes that capture context at a program location without halting
//! execution.

/// Agent version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod agent;
pub mod breakpoints;
pub mod capture;
pub mod error;
pub mod intercept;
pub mod native;
pub mod transport;
pub mod value;

// Re-export commonly used types
pub use agent::{init, init_from_env, on_breakpoint_hit, on_method_exit, on_native_exception, shutdown};
pub use aivory_config::{AgentConfig, ConfigSources, ReleaseContext};
pub use breakpoints::{BreakpointRecord, BreakpointRegistry};
pub use capture::{BreakpointCapture, CapturedValue, ExceptionCapture, StackFrame};
pub use error::AgentError;
pub use intercept::Interceptor;
pub use native::NativeExceptionHandler;
pub use transport::{CaptureSink, ConnectionState, TransportController};
pub use value::{ExceptionValue, FrameInfo, MethodDescriptor, RuntimeValue};
