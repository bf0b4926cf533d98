//! Host-facing runtime value model.
//!
//! The instrumentation boundary expresses managed-runtime values as a tagged
//! variant tree. Reference variants are `Rc`-backed with `RefCell` interiors,
//! so object identity is the allocation address and cyclic graphs are
//! constructible. A `try_borrow` failure during capture is the model-level
//! analog of a reflective field read failing.

use std::cell::RefCell;
use std::rc::Rc;

/// A managed-runtime value as seen by the capture pipeline.
#[derive(Debug, Clone)]
pub enum RuntimeValue {
    /// Absent referent.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar (any width collapses to 64-bit).
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// Character scalar.
    Char(char),
    /// String (reference-counted).
    Str(Rc<String>),
    /// Fixed array.
    Array(Rc<ArrayValue>),
    /// Linear collection (ordered or unordered).
    Seq(Rc<SeqValue>),
    /// Key-value mapping.
    Map(Rc<MapValue>),
    /// Opaque object with named instance fields.
    Object(Rc<ObjectValue>),
}

/// A fixed array with its declared type name (e.g. `java.lang.String[]`).
#[derive(Debug)]
pub struct ArrayValue {
    /// Fully-qualified declared type.
    pub type_name: String,
    /// Element storage.
    pub elements: RefCell<Vec<RuntimeValue>>,
}

/// A linear collection with its runtime type name (e.g. `java.util.ArrayList`).
#[derive(Debug)]
pub struct SeqValue {
    /// Fully-qualified runtime type.
    pub type_name: String,
    /// Element storage, in iteration order.
    pub elements: RefCell<Vec<RuntimeValue>>,
}

/// A key-value mapping with its runtime type name.
#[derive(Debug)]
pub struct MapValue {
    /// Fully-qualified runtime type.
    pub type_name: String,
    /// Entry storage, in iteration order.
    pub entries: RefCell<Vec<(RuntimeValue, RuntimeValue)>>,
}

/// An opaque object: runtime type plus declared instance fields.
///
/// Field names beginning with `$` are compiler-synthetic and skipped by the
/// serializer.
#[derive(Debug)]
pub struct ObjectValue {
    /// Fully-qualified runtime type.
    pub type_name: String,
    /// Declared instance fields, in declaration order.
    pub fields: RefCell<Vec<(String, RuntimeValue)>>,
}

impl RuntimeValue {
    /// Create a new string value.
    pub fn string(s: impl Into<String>) -> Self {
        RuntimeValue::Str(Rc::new(s.into()))
    }

    /// Create a new array value.
    pub fn array(type_name: impl Into<String>, elements: Vec<RuntimeValue>) -> Self {
        RuntimeValue::Array(Rc::new(ArrayValue {
            type_name: type_name.into(),
            elements: RefCell::new(elements),
        }))
    }

    /// Create a new collection value.
    pub fn seq(type_name: impl Into<String>, elements: Vec<RuntimeValue>) -> Self {
        RuntimeValue::Seq(Rc::new(SeqValue {
            type_name: type_name.into(),
            elements: RefCell::new(elements),
        }))
    }

    /// Create a new mapping value.
    pub fn map(type_name: impl Into<String>, entries: Vec<(RuntimeValue, RuntimeValue)>) -> Self {
        RuntimeValue::Map(Rc::new(MapValue {
            type_name: type_name.into(),
            entries: RefCell::new(entries),
        }))
    }

    /// Create a new object value.
    pub fn object(type_name: impl Into<String>, fields: Vec<(String, RuntimeValue)>) -> Self {
        RuntimeValue::Object(Rc::new(ObjectValue {
            type_name: type_name.into(),
            fields: RefCell::new(fields),
        }))
    }

    /// Returns `true` for scalars and strings.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            RuntimeValue::Bool(_)
                | RuntimeValue::Int(_)
                | RuntimeValue::Float(_)
                | RuntimeValue::Char(_)
                | RuntimeValue::Str(_)
        )
    }

    /// Fully-qualified runtime type name, or `"null"`.
    pub fn type_name(&self) -> String {
        match self {
            RuntimeValue::Null => "null".to_string(),
            RuntimeValue::Bool(_) => "bool".to_string(),
            RuntimeValue::Int(_) => "int".to_string(),
            RuntimeValue::Float(_) => "float".to_string(),
            RuntimeValue::Char(_) => "char".to_string(),
            RuntimeValue::Str(_) => "string".to_string(),
            RuntimeValue::Array(a) => a.type_name.clone(),
            RuntimeValue::Seq(s) => s.type_name.clone(),
            RuntimeValue::Map(m) => m.type_name.clone(),
            RuntimeValue::Object(o) => o.type_name.clone(),
        }
    }

    /// Identity of a reference variant (allocation address); `None` for
    /// scalars and null.
    pub fn identity(&self) -> Option<usize> {
        match self {
            RuntimeValue::Array(a) => Some(Rc::as_ptr(a) as usize),
            RuntimeValue::Seq(s) => Some(Rc::as_ptr(s) as usize),
            RuntimeValue::Map(m) => Some(Rc::as_ptr(m) as usize),
            RuntimeValue::Object(o) => Some(Rc::as_ptr(o) as usize),
            _ => None,
        }
    }

    /// Short human-readable rendering: the literal for scalars and strings,
    /// `<Simple>@<hex>` for reference variants.
    pub fn display_string(&self) -> String {
        match self {
            RuntimeValue::Null => "null".to_string(),
            RuntimeValue::Bool(b) => b.to_string(),
            RuntimeValue::Int(n) => n.to_string(),
            RuntimeValue::Float(f) => f.to_string(),
            RuntimeValue::Char(c) => c.to_string(),
            RuntimeValue::Str(s) => s.to_string(),
            _ => {
                let id = self.identity().unwrap_or(0);
                format!("{}@{id:x}", simple_type_name(&self.type_name()))
            }
        }
    }
}

/// Last dot-separated segment of a fully-qualified type name.
pub fn simple_type_name(full: &str) -> &str {
    full.rsplit('.').next().unwrap_or(full)
}

// ── Exceptions and frames ────────────────────────────────────────────────────

/// A propagating managed exception.
///
/// Always held as `Rc<ExceptionValue>`: the same allocation is handed to the
/// agent at every unwinding frame, so instance identity is the pointer.
#[derive(Debug, Clone)]
pub struct ExceptionValue {
    /// Fully-qualified exception type.
    pub exception_type: String,
    /// Exception message (may be empty).
    pub message: String,
    /// Attached stack trace, innermost frame first.
    pub frames: Vec<FrameInfo>,
}

impl ExceptionValue {
    /// Create an exception with the given trace.
    pub fn new(
        exception_type: impl Into<String>,
        message: impl Into<String>,
        frames: Vec<FrameInfo>,
    ) -> Rc<Self> {
        Rc::new(Self {
            exception_type: exception_type.into(),
            message: message.into(),
            frames,
        })
    }
}

/// Instance identity of a propagating exception.
pub fn exception_identity(exception: &Rc<ExceptionValue>) -> usize {
    Rc::as_ptr(exception) as usize
}

/// One raw stack frame as reported by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Fully-qualified class name.
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Source file name, when the runtime knows it.
    pub file_name: Option<String>,
    /// Source file path, when the runtime knows it.
    pub file_path: Option<String>,
    /// 1-based line number (0 when unknown).
    pub line_number: u32,
    /// 1-based column number, when the runtime knows it.
    pub column_number: Option<u32>,
    /// Whether the frame is native code.
    pub is_native: bool,
}

impl FrameInfo {
    /// Create a source-backed frame.
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        file_name: impl Into<String>,
        line_number: u32,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: Some(file_name.into()),
            file_path: None,
            line_number,
            column_number: None,
            is_native: false,
        }
    }

    /// Create a native frame (no source information).
    pub fn native(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: None,
            file_path: None,
            line_number: 0,
            column_number: None,
            is_native: true,
        }
    }
}

/// Descriptor of an instrumented method boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Declaring class, fully qualified.
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Declared parameter names; `None` where the runtime erased them.
    pub parameter_names: Vec<Option<String>>,
}

impl MethodDescriptor {
    /// Create a descriptor with no parameter names.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            parameter_names: Vec::new(),
        }
    }

    /// Attach declared parameter names.
    pub fn with_parameters(mut self, names: Vec<Option<String>>) -> Self {
        self.parameter_names = names;
        self
    }
}
