//! Interception controller.
//!
//! The policy layer between the instrumentation entry points and the capture
//! pipeline: recursion guard, per-exception-instance deduplication, sampling
//! gate. Guard state is per-thread; the same physical exception instance
//! produces at most one capture per thread as it unwinds.
//!
//! Nothing here may propagate into the host thread's control flow: every
//! entry point swallows internal failures, including panics.

pub mod filters;

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use aivory_config::AgentConfig;

use crate::breakpoints::BreakpointRegistry;
use crate::capture::breakpoint::BreakpointCaptureBuilder;
use crate::capture::exception::ExceptionCaptureBuilder;
use crate::transport::CaptureSink;
use crate::value::{exception_identity, ExceptionValue, FrameInfo, MethodDescriptor, RuntimeValue};

thread_local! {
    /// Recursion guard: set while this thread is inside the capture path.
    static INTERCEPTING: Cell<bool> = const { Cell::new(false) };
    /// Identity of the last exception instance captured on this thread.
    static LAST_EXCEPTION_IDENTITY: Cell<usize> = const { Cell::new(0) };
}

/// Clears the recursion guard when the capture scope exits, on every path.
struct InterceptGuard;

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        INTERCEPTING.with(|flag| flag.set(false));
    }
}

/// Decides when a capture is produced and drives the builders.
pub struct Interceptor {
    config: Arc<AgentConfig>,
    sink: Arc<dyn CaptureSink>,
    registry: Arc<BreakpointRegistry>,
}

impl Interceptor {
    /// Create a controller feeding captures into `sink`.
    pub fn new(
        config: Arc<AgentConfig>,
        sink: Arc<dyn CaptureSink>,
        registry: Arc<BreakpointRegistry>,
    ) -> Self {
        Self {
            config,
            sink,
            registry,
        }
    }

    /// Entry point for method exit with a propagating exception.
    pub fn on_method_exit(
        &self,
        receiver: Option<&RuntimeValue>,
        method: &MethodDescriptor,
        arguments: &[RuntimeValue],
        thrown: Option<&Rc<ExceptionValue>>,
    ) {
        let Some(thrown) = thrown else {
            return;
        };
        if INTERCEPTING.with(Cell::get) {
            return;
        }
        let identity = exception_identity(thrown);
        if identity == LAST_EXCEPTION_IDENTITY.with(Cell::get) {
            // Already captured at an inner frame of this unwind
            return;
        }
        INTERCEPTING.with(|flag| flag.set(true));
        LAST_EXCEPTION_IDENTITY.with(|last| last.set(identity));
        let _guard = InterceptGuard;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if !self.config.should_sample() {
                return;
            }
            let capture = ExceptionCaptureBuilder::new(&self.config).build(
                thrown, receiver, method, arguments,
            );
            self.sink.send_exception(capture);
        }));
        if result.is_err() {
            debug!("capture pipeline failure swallowed");
        }
    }

    /// Entry point for a probe-location trigger.
    ///
    /// `stack` is the current thread's stack as supplied by the
    /// instrumentation boundary.
    pub fn on_breakpoint_hit(
        &self,
        class_name: &str,
        line_number: u32,
        stack: &[FrameInfo],
        receiver: Option<&RuntimeValue>,
        arguments: &[RuntimeValue],
    ) {
        let Some(record) = self.registry.lookup(class_name, line_number) else {
            return;
        };
        record.record_hit();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let capture = BreakpointCaptureBuilder::new(&self.config).build(
                &record.id, class_name, line_number, stack, receiver, arguments,
            );
            self.sink.send_breakpoint_hit(capture);
        }));
        if result.is_err() {
            debug!("breakpoint capture failure swallowed");
        }
    }
}
