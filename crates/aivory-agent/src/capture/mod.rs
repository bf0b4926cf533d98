//! Capture pipeline: bounded serialization of execution context.
//!
//! [`serializer::ValueSerializer`] walks runtime values into bounded
//! [`model::CapturedValue`] trees; the builders in [`exception`] and
//! [`breakpoint`] compose full capture records from them.

pub mod breakpoint;
pub mod exception;
pub mod model;
pub mod serializer;

pub use breakpoint::BreakpointCaptureBuilder;
pub use exception::{fingerprint, ExceptionCaptureBuilder};
pub use model::{BreakpointCapture, CapturedValue, ExceptionCapture, StackFrame, MAX_STACK_FRAMES};
pub use serializer::{ValueSerializer, MAX_OBJECT_FIELDS};
