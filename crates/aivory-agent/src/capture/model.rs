//! Transport-facing capture records.
//!
//! These are the immutable records the capture builders produce and the
//! transport controller flattens onto the wire. All types are
//! serde-serializable for JSON transport.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::value::FrameInfo;

/// Maximum stack frames carried by any capture.
pub const MAX_STACK_FRAMES: usize = 50;

// ── CapturedValue ────────────────────────────────────────────────────────────

/// One node in a bounded capture tree.
///
/// Exactly one of `children` / `array_elements` is populated for non-scalar
/// non-null values: `children` for object fields and map entries,
/// `array_elements` for arrays and linear collections.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CapturedValue {
    /// Field, parameter, or index label.
    pub name: String,
    /// Fully-qualified runtime type name, or `"null"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Short human-readable rendering.
    pub value: String,
    /// True iff the referent is absent.
    pub is_null: bool,
    /// True iff a depth, breadth, or string-length limit clipped this subtree.
    pub is_truncated: bool,
    /// Child values keyed by field or map-key name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, CapturedValue>,
    /// Ordered child values for arrays and collections.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub array_elements: Vec<CapturedValue>,
    /// Declared length for arrays/collections/maps; 0 otherwise.
    pub array_length: usize,
    /// Identity tag (hex) for opaque objects; empty otherwise.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hash_code: String,
}

impl CapturedValue {
    /// Leaf for an absent referent.
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: "null".to_string(),
            value: "null".to_string(),
            is_null: true,
            ..Self::default()
        }
    }

    /// Scalar or string leaf.
    pub fn scalar(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: value.into(),
            ..Self::default()
        }
    }
}

// ── StackFrame ───────────────────────────────────────────────────────────────

/// One frame of a captured stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// Fully-qualified class name.
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Source file name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Source file path, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// 1-based line number (0 when unknown).
    pub line_number: u32,
    /// 1-based column number, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    /// Whether the frame is native code.
    pub is_native: bool,
    /// Whether source is resolvable: a file name is known and the frame is
    /// not native.
    pub source_available: bool,
    /// Frame-local variables; populated only on the native-subagent path.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub local_variables: BTreeMap<String, CapturedValue>,
}

impl From<&FrameInfo> for StackFrame {
    fn from(frame: &FrameInfo) -> Self {
        Self {
            class_name: frame.class_name.clone(),
            method_name: frame.method_name.clone(),
            file_name: frame.file_name.clone(),
            file_path: frame.file_path.clone(),
            line_number: frame.line_number,
            column_number: frame.column_number,
            is_native: frame.is_native,
            source_available: frame.file_name.is_some() && !frame.is_native,
            local_variables: BTreeMap::new(),
        }
    }
}

// ── ExceptionCapture ─────────────────────────────────────────────────────────

/// Structured snapshot of a failing execution context.
///
/// Immutable after construction; built on the triggering thread, handed to
/// the transport, and discarded after enqueue serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionCapture {
    /// Unique opaque capture id.
    pub id: String,
    /// Fully-qualified exception type.
    pub exception_type: String,
    /// Exception message (may be empty).
    pub message: String,
    /// 16-hex-char digest for server-side grouping.
    pub fingerprint: String,
    /// Capture time (RFC 3339 UTC).
    pub captured_at: String,
    /// Stack trace, innermost first, at most [`MAX_STACK_FRAMES`] frames.
    pub stack_trace: Vec<StackFrame>,
    /// Receiver fields (keyed `this.<field>`) and native-path globals.
    pub local_variables: BTreeMap<String, CapturedValue>,
    /// Method arguments keyed by parameter name or `arg<i>`.
    pub method_arguments: BTreeMap<String, CapturedValue>,
}

// ── BreakpointCapture ────────────────────────────────────────────────────────

/// Context captured at a non-breaking breakpoint probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointCapture {
    /// Server-assigned breakpoint id.
    pub breakpoint_id: String,
    /// Probe class, fully qualified.
    pub class_name: String,
    /// Probe line.
    pub line_number: u32,
    /// Capture time (RFC 3339 UTC).
    pub captured_at: String,
    /// Current-thread stack, scaffolding frames removed.
    pub stack_trace: Vec<StackFrame>,
    /// Receiver fields (`this.<field>`) and positional arguments (`arg<i>`).
    pub local_variables: BTreeMap<String, CapturedValue>,
}

/// Current time, RFC 3339 UTC with millisecond precision.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
