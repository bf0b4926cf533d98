//! Native subagent exception path.
//!
//! The native subagent walks stack frames out-of-process and reports
//! exceptions with true locals as an opaque JSON payload. This path is a
//! peer of the interception controller: it carries its own identity-based
//! dedup window and sampling gate, then pushes a pre-formed exception
//! capture to the transport.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use aivory_config::AgentConfig;

use crate::capture::exception::{fingerprint, random_capture_id};
use crate::capture::model::{now_rfc3339, CapturedValue, ExceptionCapture, StackFrame, MAX_STACK_FRAMES};
use crate::transport::CaptureSink;
use crate::value::{exception_identity, ExceptionValue};

/// Repeat reports of one exception instance inside this window are dropped.
pub const DEDUP_WINDOW: Duration = Duration::from_millis(100);
/// The dedup map is pruned lazily once it grows past this many entries.
const DEDUP_PRUNE_THRESHOLD: usize = 1000;

/// Handles exception callbacks from the native subagent.
pub struct NativeExceptionHandler {
    config: Arc<AgentConfig>,
    sink: Arc<dyn CaptureSink>,
    dedup: Mutex<HashMap<usize, Instant>>,
}

impl NativeExceptionHandler {
    /// Create a handler feeding captures into `sink`.
    pub fn new(config: Arc<AgentConfig>, sink: Arc<dyn CaptureSink>) -> Self {
        Self {
            config,
            sink,
            dedup: Mutex::new(HashMap::new()),
        }
    }

    /// Entry point for one native exception report.
    ///
    /// `location` names the throw site (`Class.method`, optionally with a
    /// `:line` suffix). `variables_json` is a JSON object whose top-level
    /// keys either name globals or follow `frame_<i>_<frame-label>` for
    /// per-frame locals.
    pub fn on_native_exception(
        &self,
        location: &str,
        variables_json: &str,
        thrown: &Rc<ExceptionValue>,
    ) {
        let identity = exception_identity(thrown);
        if !self.should_emit(identity) {
            return;
        }
        if !self.config.should_sample() {
            return;
        }

        let mut stack_trace: Vec<StackFrame> = thrown
            .frames
            .iter()
            .take(MAX_STACK_FRAMES)
            .map(StackFrame::from)
            .collect();
        let mut local_variables = BTreeMap::new();

        match serde_json::from_str::<serde_json::Value>(variables_json) {
            Ok(serde_json::Value::Object(entries)) => {
                for (key, value) in entries {
                    match parse_frame_key(&key) {
                        Some((index, label)) => {
                            attach_frame_locals(&self.config, &mut stack_trace, index, label, &value)
                        }
                        None => {
                            let node = json_to_captured(&self.config, &key, &value, 0);
                            local_variables.insert(key, node);
                        }
                    }
                }
            }
            Ok(_) => debug!("native variables payload is not an object, ignored"),
            Err(e) => debug!(error = %e, "native variables payload unparseable, ignored"),
        }

        let (class_name, method_name) = split_location(location);
        let capture = ExceptionCapture {
            id: random_capture_id(),
            exception_type: thrown.exception_type.clone(),
            message: thrown.message.clone(),
            fingerprint: fingerprint(&thrown.exception_type, class_name, method_name, &thrown.frames),
            captured_at: now_rfc3339(),
            stack_trace,
            local_variables,
            method_arguments: BTreeMap::new(),
        };
        self.sink.send_exception(capture);
    }

    /// Identity-based dedup over [`DEDUP_WINDOW`], with lazy pruning.
    fn should_emit(&self, identity: usize) -> bool {
        let mut seen = self.dedup.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = seen.get(&identity) {
            if now.duration_since(*last) < DEDUP_WINDOW {
                return false;
            }
        }
        seen.insert(identity, now);
        if seen.len() > DEDUP_PRUNE_THRESHOLD {
            seen.retain(|_, last| now.duration_since(*last) < DEDUP_WINDOW);
        }
        true
    }

    #[cfg(test)]
    fn dedup_len(&self) -> usize {
        self.dedup.lock().unwrap().len()
    }
}

/// Split a `frame_<i>_<label>` key; `None` for plain global keys.
fn parse_frame_key(key: &str) -> Option<(usize, &str)> {
    let rest = key.strip_prefix("frame_")?;
    let (index, label) = rest.split_once('_')?;
    Some((index.parse().ok()?, label))
}

/// Lift one decoded frame group into the matching stack frame's locals.
fn attach_frame_locals(
    config: &AgentConfig,
    stack_trace: &mut [StackFrame],
    index: usize,
    label: &str,
    value: &serde_json::Value,
) {
    let Some(frame) = stack_trace.get_mut(index) else {
        debug!(index, "frame locals for unknown frame, ignored");
        return;
    };
    match value {
        serde_json::Value::Object(locals) => {
            for (name, local) in locals {
                let node = json_to_captured(config, name, local, 0);
                frame.local_variables.insert(name.clone(), node);
            }
        }
        other => {
            let node = json_to_captured(config, label, other, 0);
            frame.local_variables.insert(label.to_string(), node);
        }
    }
}

/// Split a `Class.method[:line]` location string.
fn split_location(location: &str) -> (&str, &str) {
    let location = location.split(':').next().unwrap_or(location);
    location.rsplit_once('.').unwrap_or(("", location))
}

/// Convert one opaque JSON value into a bounded capture tree.
fn json_to_captured(
    config: &AgentConfig,
    name: &str,
    value: &serde_json::Value,
    depth: usize,
) -> CapturedValue {
    match value {
        serde_json::Value::Null => CapturedValue::null(name),
        serde_json::Value::Bool(b) => CapturedValue::scalar(name, "bool", b.to_string()),
        serde_json::Value::Number(n) => CapturedValue::scalar(name, "number", n.to_string()),
        serde_json::Value::String(s) => {
            let mut node = CapturedValue::scalar(name, "string", String::new());
            if s.chars().count() > config.max_string_length {
                node.value = s.chars().take(config.max_string_length).collect();
                node.is_truncated = true;
            } else {
                node.value = s.clone();
            }
            node
        }
        serde_json::Value::Array(elements) => {
            let mut node =
                CapturedValue::scalar(name, "array", format!("array[{}]", elements.len()));
            node.array_length = elements.len();
            if depth >= config.max_capture_depth {
                node.is_truncated = true;
                return node;
            }
            let take = elements.len().min(config.max_collection_size);
            for (i, element) in elements.iter().take(take).enumerate() {
                node.array_elements
                    .push(json_to_captured(config, &format!("[{i}]"), element, depth + 1));
            }
            if take < elements.len() {
                node.is_truncated = true;
            }
            node
        }
        serde_json::Value::Object(entries) => {
            let mut node =
                CapturedValue::scalar(name, "object", format!("object<{} entries>", entries.len()));
            node.array_length = entries.len();
            if depth >= config.max_capture_depth {
                node.is_truncated = true;
                return node;
            }
            let take = entries.len().min(config.max_collection_size);
            for (key, entry) in entries.iter().take(take) {
                node.children
                    .insert(key.clone(), json_to_captured(config, key, entry, depth + 1));
            }
            if take < entries.len() {
                node.is_truncated = true;
            }
            node
        }
    }
}
