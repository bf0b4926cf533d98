//! Exception capture builder.
//!
//! Composes the stack trace, receiver-field map, argument map, and grouping
//! fingerprint for one intercepted exception.

use std::collections::BTreeMap;
use std::rc::Rc;

use rand::RngExt;
use sha2::{Digest, Sha256};

use aivory_config::AgentConfig;

use crate::capture::model::{now_rfc3339, CapturedValue, ExceptionCapture, StackFrame, MAX_STACK_FRAMES};
use crate::capture::serializer::{ValueSerializer, MAX_OBJECT_FIELDS};
use crate::value::{ExceptionValue, FrameInfo, MethodDescriptor, RuntimeValue};

/// Frames fed into the fingerprint digest.
const FINGERPRINT_FRAMES: usize = 5;
/// Hex chars kept from the digest.
const FINGERPRINT_LENGTH: usize = 16;

/// Builds [`ExceptionCapture`] records.
pub struct ExceptionCaptureBuilder<'a> {
    config: &'a AgentConfig,
}

impl<'a> ExceptionCaptureBuilder<'a> {
    /// Create a builder reading limits from the given config.
    pub fn new(config: &'a AgentConfig) -> Self {
        Self { config }
    }

    /// Build a capture for one intercepted exception.
    pub fn build(
        &self,
        thrown: &Rc<ExceptionValue>,
        receiver: Option<&RuntimeValue>,
        method: &MethodDescriptor,
        arguments: &[RuntimeValue],
    ) -> ExceptionCapture {
        let serializer = ValueSerializer::new(self.config);

        let stack_trace: Vec<StackFrame> = thrown
            .frames
            .iter()
            .take(MAX_STACK_FRAMES)
            .map(StackFrame::from)
            .collect();

        let mut method_arguments = BTreeMap::new();
        for (i, argument) in arguments.iter().enumerate() {
            let name = method
                .parameter_names
                .get(i)
                .and_then(|n| n.clone())
                .unwrap_or_else(|| format!("arg{i}"));
            let node = serializer.capture(&name, argument, 0);
            method_arguments.insert(name, node);
        }

        ExceptionCapture {
            id: random_capture_id(),
            exception_type: thrown.exception_type.clone(),
            message: thrown.message.clone(),
            fingerprint: fingerprint(
                &thrown.exception_type,
                &method.class_name,
                &method.method_name,
                &thrown.frames,
            ),
            captured_at: now_rfc3339(),
            stack_trace,
            local_variables: capture_receiver_fields(&serializer, receiver),
            method_arguments,
        }
    }
}

/// Capture a receiver's instance fields keyed `this.<field>`.
///
/// Applies the same per-object field cap and synthetic-field skip as the
/// serializer's object walk. Non-object receivers contribute nothing.
pub(crate) fn capture_receiver_fields(
    serializer: &ValueSerializer<'_>,
    receiver: Option<&RuntimeValue>,
) -> BTreeMap<String, CapturedValue> {
    let mut variables = BTreeMap::new();
    let Some(RuntimeValue::Object(object)) = receiver else {
        return variables;
    };
    let Ok(fields) = object.fields.try_borrow() else {
        return variables;
    };
    for (field_name, field_value) in fields
        .iter()
        .filter(|(n, _)| !n.starts_with('$'))
        .take(MAX_OBJECT_FIELDS)
    {
        let key = format!("this.{field_name}");
        let node = serializer.capture(&key, field_value, 0);
        variables.insert(key, node);
    }
    variables
}

/// Compute the 16-hex-char grouping fingerprint.
///
/// Digest input is the exception type, the intercepted method, and the top
/// five frames of the attached trace, so two exceptions of the same shape
/// from the same location group together server-side.
pub fn fingerprint(
    exception_type: &str,
    class_name: &str,
    method_name: &str,
    frames: &[FrameInfo],
) -> String {
    let mut input = format!("{exception_type}:{class_name}.{method_name}");
    for frame in frames.iter().take(FINGERPRINT_FRAMES) {
        input.push_str(&format!(
            ":{}.{}:{}",
            frame.class_name, frame.method_name, frame.line_number
        ));
    }
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..FINGERPRINT_LENGTH].to_string()
}

/// Generate a random 32-hex-char capture id.
pub fn random_capture_id() -> String {
    let mut rng = rand::rng();
    format!("{:016x}{:016x}", rng.random::<u64>(), rng.random::<u64>())
}
