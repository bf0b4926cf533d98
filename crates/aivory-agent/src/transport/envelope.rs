//! Wire protocol types.
//!
//! Duplex text frames carrying UTF-8 JSON. Each outbound frame is one
//! [`Envelope`] with a `type`, a `payload`, and an epoch-millisecond
//! `timestamp`; inbound frames deserialize into [`ServerCommand`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use aivory_config::AgentConfig;

use crate::capture::model::{BreakpointCapture, ExceptionCapture};

/// Agent version reported during registration.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Kind discriminant of an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Identity announcement, sent directly after the handshake.
    Register,
    /// Periodic liveness signal while authenticated.
    Heartbeat,
    /// One exception capture.
    Exception,
    /// One breakpoint-hit capture.
    BreakpointHit,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnvelopeKind::Register => "register",
            EnvelopeKind::Heartbeat => "heartbeat",
            EnvelopeKind::Exception => "exception",
            EnvelopeKind::BreakpointHit => "breakpoint_hit",
        };
        write!(f, "{name}")
    }
}

/// One outbound transport frame.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Frame kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Kind-specific payload.
    pub payload: serde_json::Value,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to one wire frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of the `register` envelope.
pub fn register_payload(config: &AgentConfig) -> serde_json::Value {
    let mut payload = json!({
        "api_key": config.api_key,
        "agent_id": config.agent_id,
        "hostname": config.hostname,
        "runtime": config.runtime_name,
        "runtime_version": config.runtime_version,
        "agent_version": AGENT_VERSION,
        "environment": config.environment,
    });
    if let Some(context) = &config.release_context {
        if let Ok(value) = serde_json::to_value(context) {
            payload["git_context"] = value;
        }
    }
    payload
}

/// Payload of the `heartbeat` envelope.
pub fn heartbeat_payload(agent_id: &str) -> serde_json::Value {
    json!({
        "timestamp": Utc::now().timestamp_millis(),
        "agent_id": agent_id,
    })
}

/// Payload of the `exception` envelope: the capture flattened to the wire
/// schema, with agent identity and the top frame's location fields inlined.
pub fn exception_payload(capture: &ExceptionCapture, config: &AgentConfig) -> serde_json::Value {
    let top = capture.stack_trace.first();
    let mut payload = json!({
        "exception_type": capture.exception_type,
        "message": capture.message,
        "fingerprint": capture.fingerprint,
        "stack_trace": capture.stack_trace,
        "local_variables": capture.local_variables,
        "method_arguments": capture.method_arguments,
        "captured_at": capture.captured_at,
        "agent_id": config.agent_id,
        "environment": config.environment,
        "runtime": config.runtime_name,
        "runtime_version": config.runtime_version,
        "file_path": top.and_then(|f| f.file_path.clone()),
        "file_name": top.and_then(|f| f.file_name.clone()),
        "line_number": top.map(|f| f.line_number).unwrap_or(0),
        "method_name": top.map(|f| f.method_name.clone()).unwrap_or_default(),
        "class_name": top.map(|f| f.class_name.clone()).unwrap_or_default(),
    });
    if let Some(context) = &config.release_context {
        if let Ok(value) = serde_json::to_value(context) {
            payload["git_context"] = value;
        }
    }
    payload
}

/// Payload of the `breakpoint_hit` envelope.
pub fn breakpoint_hit_payload(capture: &BreakpointCapture, agent_id: &str) -> serde_json::Value {
    json!({
        "breakpoint_id": capture.breakpoint_id,
        "agent_id": agent_id,
        "captured_at": capture.captured_at,
        "local_variables": capture.local_variables,
        "stack_trace": capture.stack_trace,
    })
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Commands received from the ingest endpoint.
///
/// Payload fields are optional at the serde layer; the dispatcher validates
/// required fields and drops commands that miss them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerCommand {
    /// Registration acknowledged; the session is authenticated.
    Registered {
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    /// Server-side error; auth-class codes are terminal.
    Error {
        #[serde(default)]
        payload: Option<ErrorPayload>,
    },
    /// Install a non-breaking breakpoint.
    SetBreakpoint {
        #[serde(default)]
        payload: Option<SetBreakpointPayload>,
    },
    /// Remove a breakpoint by id.
    RemoveBreakpoint {
        #[serde(default)]
        payload: Option<RemoveBreakpointPayload>,
    },
    /// Reserved; ignored.
    Configure {
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    /// Any unrecognized command kind; ignored.
    #[serde(other)]
    Unknown,
}

/// Payload of an inbound `error` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of an inbound `set_breakpoint` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetBreakpointPayload {
    /// Server-assigned breakpoint id.
    #[serde(default)]
    pub id: Option<String>,
    /// Probe class, fully qualified.
    #[serde(default)]
    pub class_name: Option<String>,
    /// Probe line.
    #[serde(default)]
    pub line_number: Option<u32>,
    /// Conditional expression; stored but never evaluated.
    #[serde(default)]
    pub condition: Option<String>,
}

/// Payload of an inbound `remove_breakpoint` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoveBreakpointPayload {
    /// Breakpoint id to remove.
    #[serde(default)]
    pub id: Option<String>,
}

/// Parse one inbound text frame.
pub fn parse_command(text: &str) -> Result<ServerCommand, serde_json::Error> {
    serde_json::from_str(text)
}

/// Auth-class error codes terminate the session permanently.
pub fn is_auth_error(code: &str) -> bool {
    matches!(code, "auth_error" | "invalid_api_key")
}
