//! Bounded reflective value serialization.
//!
//! Walks one runtime value into a [`CapturedValue`] tree under the
//! configured depth, breadth, and string-length limits. Pure function of
//! `(value, limits)`; the only side effect is reading the value graph.
//! The depth fence doubles as the cycle guard: any reference variant at the
//! depth limit collapses to an opaque identity leaf, so arbitrary cyclic
//! graphs terminate.

use aivory_config::AgentConfig;

use crate::capture::model::CapturedValue;
use crate::value::{simple_type_name, ArrayValue, MapValue, ObjectValue, RuntimeValue, SeqValue};

/// Hard per-node cap on captured object fields, independent of depth.
pub const MAX_OBJECT_FIELDS: usize = 20;
/// Map keys longer than this are clipped with a `"..."` suffix.
pub const MAX_KEY_LENGTH: usize = 50;

/// Serializes runtime values into bounded capture trees.
pub struct ValueSerializer<'a> {
    config: &'a AgentConfig,
}

impl<'a> ValueSerializer<'a> {
    /// Create a serializer reading limits from the given config.
    pub fn new(config: &'a AgentConfig) -> Self {
        Self { config }
    }

    /// Capture `value` under `name`, recursing from `depth`.
    pub fn capture(&self, name: &str, value: &RuntimeValue, depth: usize) -> CapturedValue {
        match value {
            RuntimeValue::Null => CapturedValue::null(name),
            RuntimeValue::Bool(_)
            | RuntimeValue::Int(_)
            | RuntimeValue::Float(_)
            | RuntimeValue::Char(_)
            | RuntimeValue::Str(_) => self.capture_scalar(name, value),
            _ if depth >= self.config.max_capture_depth => self.opaque_leaf(name, value),
            RuntimeValue::Array(array) => self.capture_array(name, value, array, depth),
            RuntimeValue::Seq(seq) => self.capture_seq(name, value, seq, depth),
            RuntimeValue::Map(map) => self.capture_map(name, value, map, depth),
            RuntimeValue::Object(object) => self.capture_object(name, value, object, depth),
        }
    }

    fn capture_scalar(&self, name: &str, value: &RuntimeValue) -> CapturedValue {
        let rendered = value.display_string();
        let mut node = CapturedValue::scalar(name, value.type_name(), String::new());
        if rendered.chars().count() > self.config.max_string_length {
            node.value = rendered.chars().take(self.config.max_string_length).collect();
            node.is_truncated = true;
        } else {
            node.value = rendered;
        }
        node
    }

    /// Depth fence: any reference variant at or past the limit collapses to
    /// an identity leaf with no descendants.
    fn opaque_leaf(&self, name: &str, value: &RuntimeValue) -> CapturedValue {
        let id = value.identity().unwrap_or(0);
        let type_name = value.type_name();
        let mut node = CapturedValue::scalar(
            name,
            type_name.clone(),
            format!("{}@{id:x}", simple_type_name(&type_name)),
        );
        node.is_truncated = true;
        if matches!(value, RuntimeValue::Object(_)) {
            node.hash_code = format!("{id:x}");
        }
        node
    }

    fn capture_array(
        &self,
        name: &str,
        value: &RuntimeValue,
        array: &ArrayValue,
        depth: usize,
    ) -> CapturedValue {
        let mut node = CapturedValue::scalar(name, value.type_name(), String::new());
        let Ok(elements) = array.elements.try_borrow() else {
            node.value = simple_type_name(&array.type_name).to_string();
            node.is_truncated = true;
            return node;
        };
        let len = elements.len();
        node.array_length = len;
        node.value = array_value_label(&array.type_name, len);
        let take = len.min(self.config.max_collection_size);
        for (i, element) in elements.iter().take(take).enumerate() {
            node.array_elements
                .push(self.capture(&format!("[{i}]"), element, depth + 1));
        }
        if take < len {
            node.is_truncated = true;
        }
        node
    }

    fn capture_seq(
        &self,
        name: &str,
        value: &RuntimeValue,
        seq: &SeqValue,
        depth: usize,
    ) -> CapturedValue {
        let mut node = CapturedValue::scalar(name, value.type_name(), String::new());
        let Ok(elements) = seq.elements.try_borrow() else {
            node.value = simple_type_name(&seq.type_name).to_string();
            node.is_truncated = true;
            return node;
        };
        let len = elements.len();
        node.array_length = len;
        node.value = format!("{}<{len} items>", simple_type_name(&seq.type_name));
        let take = len.min(self.config.max_collection_size);
        for (i, element) in elements.iter().take(take).enumerate() {
            node.array_elements
                .push(self.capture(&format!("[{i}]"), element, depth + 1));
        }
        if take < len {
            node.is_truncated = true;
        }
        node
    }

    fn capture_map(
        &self,
        name: &str,
        value: &RuntimeValue,
        map: &MapValue,
        depth: usize,
    ) -> CapturedValue {
        let mut node = CapturedValue::scalar(name, value.type_name(), String::new());
        let Ok(entries) = map.entries.try_borrow() else {
            node.value = simple_type_name(&map.type_name).to_string();
            node.is_truncated = true;
            return node;
        };
        let len = entries.len();
        node.array_length = len;
        node.value = format!("{}<{len} entries>", simple_type_name(&map.type_name));
        let take = len.min(self.config.max_collection_size);
        for (key, entry) in entries.iter().take(take) {
            let label = clip_key(&key.display_string());
            let child = self.capture(&label, entry, depth + 1);
            node.children.insert(label, child);
        }
        if take < len {
            node.is_truncated = true;
        }
        node
    }

    fn capture_object(
        &self,
        name: &str,
        value: &RuntimeValue,
        object: &ObjectValue,
        depth: usize,
    ) -> CapturedValue {
        let id = value.identity().unwrap_or(0);
        let mut node = CapturedValue::scalar(
            name,
            value.type_name(),
            format!("{}@{id:x}", simple_type_name(&object.type_name)),
        );
        node.hash_code = format!("{id:x}");
        let Ok(fields) = object.fields.try_borrow() else {
            // Unreadable fields are silently skipped; the parent records the loss.
            node.is_truncated = true;
            return node;
        };
        let mut captured = 0usize;
        for (field_name, field_value) in fields.iter().filter(|(n, _)| !is_synthetic_field(n)) {
            if captured >= MAX_OBJECT_FIELDS {
                node.is_truncated = true;
                break;
            }
            let child = self.capture(field_name, field_value, depth + 1);
            node.children.insert(field_name.clone(), child);
            captured += 1;
        }
        node
    }
}

/// Render an array's `value` label: the declared type with `[len]`
/// substituted for `[]`, or appended when the declared type carries none.
fn array_value_label(type_name: &str, len: usize) -> String {
    let simple = simple_type_name(type_name);
    if simple.contains("[]") {
        simple.replacen("[]", &format!("[{len}]"), 1)
    } else {
        format!("{simple}[{len}]")
    }
}

/// Clip a map-key label to [`MAX_KEY_LENGTH`] characters with a `"..."` suffix.
fn clip_key(key: &str) -> String {
    if key.chars().count() > MAX_KEY_LENGTH {
        let clipped: String = key.chars().take(MAX_KEY_LENGTH).collect();
        format!("{clipped}...")
    } else {
        key.to_string()
    }
}

/// Compiler-synthetic field names are skipped entirely.
fn is_synthetic_field(name: &str) -> bool {
    name.starts_with('$')
}
