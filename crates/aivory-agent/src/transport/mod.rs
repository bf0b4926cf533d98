//! Transport: duplex session, wire protocol, and the capture hand-off seam.

pub mod controller;
pub mod envelope;

use crate::capture::model::{BreakpointCapture, ExceptionCapture};

pub use controller::{
    reconnect_delay, ConnectionState, TransportController, HEARTBEAT_PERIOD,
    MAX_RECONNECT_ATTEMPTS, SEND_QUEUE_CAPACITY,
};
pub use envelope::{Envelope, EnvelopeKind, ServerCommand, AGENT_VERSION};

/// Where finished captures go.
///
/// The interception controller and the native-subagent path hand completed
/// captures through this seam; the transport controller implements it by
/// serializing onto the send queue. Implementations must not block.
pub trait CaptureSink: Send + Sync {
    /// Accept one exception capture.
    fn send_exception(&self, capture: ExceptionCapture);
    /// Accept one breakpoint-hit capture.
    fn send_breakpoint_hit(&self, capture: BreakpointCapture);
}
