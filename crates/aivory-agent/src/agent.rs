//! Agent lifecycle and instrumentation entry points.
//!
//! The agent is initialized once per process; an immutable context lives in
//! a process-wide read-only cell and every instrumentation advice site
//! resolves through one lookup. Entry points are free functions so injected
//! call sites need no state of their own. All of them are no-ops before
//! `init` and after a failed lookup.

use std::rc::Rc;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use aivory_config::{AgentConfig, ConfigSources};

use crate::breakpoints::BreakpointRegistry;
use crate::error::AgentError;
use crate::intercept::filters::ClassFilter;
use crate::intercept::Interceptor;
use crate::native::NativeExceptionHandler;
use crate::transport::{CaptureSink, TransportController};
use crate::value::{ExceptionValue, FrameInfo, MethodDescriptor, RuntimeValue};

static AGENT: OnceCell<Arc<AgentContext>> = OnceCell::new();

/// Everything the instrumentation entry points need, built once at init.
pub struct AgentContext {
    /// Immutable configuration snapshot.
    pub config: Arc<AgentConfig>,
    /// The duplex transport session.
    pub transport: Arc<TransportController>,
    /// Active non-breaking breakpoints.
    pub registry: Arc<BreakpointRegistry>,
    /// Exception interception policy.
    pub interceptor: Interceptor,
    /// Native subagent callback path.
    pub native: NativeExceptionHandler,
    filter: ClassFilter,
}

/// Initialize the agent and open the transport session.
///
/// Errors only on double initialization; transport failures are handled by
/// the reconnect machinery and never surface here.
pub fn init(config: AgentConfig) -> Result<(), AgentError> {
    let config = Arc::new(config);
    let registry = Arc::new(BreakpointRegistry::new());
    let transport = Arc::new(TransportController::new(config.clone(), registry.clone()));
    let sink: Arc<dyn CaptureSink> = transport.clone();

    let context = AgentContext {
        interceptor: Interceptor::new(config.clone(), sink.clone(), registry.clone()),
        native: NativeExceptionHandler::new(config.clone(), sink),
        filter: ClassFilter::from_config(&config),
        config,
        transport: transport.clone(),
        registry,
    };
    AGENT
        .set(Arc::new(context))
        .map_err(|_| AgentError::AlreadyInitialized)?;
    debug!("agent initialized");
    transport.start();
    Ok(())
}

/// Initialize from the process environment (see `aivory-config` for the
/// accepted keys), optionally with an agent-argument string.
pub fn init_from_env(agent_args: Option<&str>) -> Result<(), AgentError> {
    let mut sources = ConfigSources::from_process_env();
    if let Some(args) = agent_args {
        sources = sources.with_agent_args(args);
    }
    init(sources.load()?)
}

/// The process-wide agent context, when initialized.
pub fn context() -> Option<&'static Arc<AgentContext>> {
    AGENT.get()
}

/// Process-exit hook: stop reconnection and timers, close the session,
/// drop queued envelopes. Captures in progress complete but are not awaited.
pub fn shutdown() {
    if let Some(context) = AGENT.get() {
        context.transport.shutdown();
    }
}

/// Instrumentation entry: method exit with a propagating exception.
pub fn on_method_exit(
    receiver: Option<&RuntimeValue>,
    method: &MethodDescriptor,
    arguments: &[RuntimeValue],
    thrown: Option<&Rc<ExceptionValue>>,
) {
    if let Some(context) = AGENT.get() {
        context
            .interceptor
            .on_method_exit(receiver, method, arguments, thrown);
    }
}

/// Instrumentation entry: probe-location trigger.
pub fn on_breakpoint_hit(
    class_name: &str,
    line_number: u32,
    stack: &[FrameInfo],
    receiver: Option<&RuntimeValue>,
    arguments: &[RuntimeValue],
) {
    if let Some(context) = AGENT.get() {
        context
            .interceptor
            .on_breakpoint_hit(class_name, line_number, stack, receiver, arguments);
    }
}

/// Native subagent entry: exception with out-of-process locals.
pub fn on_native_exception(location: &str, variables_json: &str, thrown: &Rc<ExceptionValue>) {
    if let Some(context) = AGENT.get() {
        context
            .native
            .on_native_exception(location, variables_json, thrown);
    }
}

/// Coverage query for the instrumentation collaborator.
///
/// `false` until the agent is initialized.
pub fn should_instrument(class_name: &str) -> bool {
    AGENT
        .get()
        .map(|context| context.filter.should_instrument(class_name))
        .unwrap_or(false)
}
