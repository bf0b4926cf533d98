//! Breakpoint capture builder.
//!
//! Captures local context at a non-breaking breakpoint probe: the current
//! thread's stack with agent and runtime scaffolding scrubbed from the
//! prefix, receiver fields, and positional arguments.

use aivory_config::AgentConfig;

use crate::capture::exception::capture_receiver_fields;
use crate::capture::model::{now_rfc3339, BreakpointCapture, StackFrame, MAX_STACK_FRAMES};
use crate::capture::serializer::ValueSerializer;
use crate::intercept::filters::is_scaffold_frame;
use crate::value::{FrameInfo, RuntimeValue};

/// Builds [`BreakpointCapture`] records.
pub struct BreakpointCaptureBuilder<'a> {
    config: &'a AgentConfig,
}

impl<'a> BreakpointCaptureBuilder<'a> {
    /// Create a builder reading limits from the given config.
    pub fn new(config: &'a AgentConfig) -> Self {
        Self { config }
    }

    /// Build a capture for one probe hit.
    ///
    /// `stack` is the current thread's stack as supplied by the
    /// instrumentation boundary, innermost frame first; leading agent and
    /// thread-introspection frames are dropped before the 50-frame cap.
    pub fn build(
        &self,
        breakpoint_id: &str,
        class_name: &str,
        line_number: u32,
        stack: &[FrameInfo],
        receiver: Option<&RuntimeValue>,
        arguments: &[RuntimeValue],
    ) -> BreakpointCapture {
        let serializer = ValueSerializer::new(self.config);

        let stack_trace: Vec<StackFrame> = stack
            .iter()
            .skip_while(|frame| is_scaffold_frame(&frame.class_name))
            .take(MAX_STACK_FRAMES)
            .map(StackFrame::from)
            .collect();

        let mut local_variables = capture_receiver_fields(&serializer, receiver);
        for (i, argument) in arguments.iter().enumerate() {
            let name = format!("arg{i}");
            let node = serializer.capture(&name, argument, 0);
            local_variables.insert(name, node);
        }

        BreakpointCapture {
            breakpoint_id: breakpoint_id.to_string(),
            class_name: class_name.to_string(),
            line_number,
            captured_at: now_rfc3339(),
            stack_trace,
            local_variables,
        }
    }
}
