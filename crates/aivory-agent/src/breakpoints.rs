//! Breakpoint registry.
//!
//! Stores server-installed probes under two indices: by server-assigned id
//! and by `class:line` location, both pointing at the same shared record.
//! This is pure storage with no transport references; the interception
//! controller queries it on probe hits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

// ── BreakpointRecord ─────────────────────────────────────────────────────────

/// A server-installed probe.
///
/// Lives in the registry until the server removes it or the session ends;
/// the agent never destroys one autonomously.
#[derive(Debug)]
pub struct BreakpointRecord {
    /// Server-assigned id.
    pub id: String,
    /// Probe class, fully qualified.
    pub class_name: String,
    /// Probe line.
    pub line_number: u32,
    /// Conditional expression. Accepted and stored, never evaluated.
    pub condition: Option<String>,
    hit_count: AtomicU64,
}

impl BreakpointRecord {
    fn new(id: &str, class_name: &str, line_number: u32, condition: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            class_name: class_name.to_string(),
            line_number,
            condition,
            hit_count: AtomicU64::new(0),
        }
    }

    /// Number of times the probe location has been hit.
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// Record one hit, returning the new count.
    pub(crate) fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// ── BreakpointRegistry ───────────────────────────────────────────────────────

/// Callback asking the instrumentation collaborator to re-instrument a class.
pub type ReinstrumentHook = Box<dyn Fn(&str) + Send + Sync>;

/// Concurrent store of active probes.
pub struct BreakpointRegistry {
    by_id: RwLock<HashMap<String, Arc<BreakpointRecord>>>,
    by_location: RwLock<HashMap<String, Arc<BreakpointRecord>>>,
    reinstrument: ReinstrumentHook,
}

impl std::fmt::Debug for BreakpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakpointRegistry")
            .field("count", &self.count())
            .finish()
    }
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointRegistry {
    /// Create an empty registry with a no-op re-instrumentation hook.
    pub fn new() -> Self {
        Self::with_reinstrument_hook(Box::new(|_| {}))
    }

    /// Create an empty registry that notifies `hook` whenever a class needs
    /// (re-)instrumentation.
    pub fn with_reinstrument_hook(hook: ReinstrumentHook) -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            by_location: RwLock::new(HashMap::new()),
            reinstrument: hook,
        }
    }

    /// Install a probe under both indices and request re-instrumentation of
    /// its class. Re-setting an existing id replaces the old probe.
    pub fn set(&self, id: &str, class_name: &str, line_number: u32, condition: Option<String>) {
        self.remove(id);
        let record = Arc::new(BreakpointRecord::new(id, class_name, line_number, condition));
        self.by_id
            .write()
            .unwrap()
            .insert(id.to_string(), record.clone());
        self.by_location
            .write()
            .unwrap()
            .insert(location_key(class_name, line_number), record);
        (self.reinstrument)(class_name);
    }

    /// Remove a probe by id, clearing both indices.
    ///
    /// Returns `true` when a probe existed.
    pub fn remove(&self, id: &str) -> bool {
        let Some(record) = self.by_id.write().unwrap().remove(id) else {
            return false;
        };
        self.by_location
            .write()
            .unwrap()
            .remove(&location_key(&record.class_name, record.line_number));
        true
    }

    /// Look up the probe registered at a location.
    pub fn lookup(&self, class_name: &str, line_number: u32) -> Option<Arc<BreakpointRecord>> {
        self.by_location
            .read()
            .unwrap()
            .get(&location_key(class_name, line_number))
            .cloned()
    }

    /// Look up a probe by server-assigned id.
    pub fn get(&self, id: &str) -> Option<Arc<BreakpointRecord>> {
        self.by_id.read().unwrap().get(id).cloned()
    }

    /// Whether any probe targets the given class.
    ///
    /// Weakly consistent; used to decide whether a class still needs its
    /// probe instrumentation after a removal.
    pub fn has_any_for_class(&self, class_name: &str) -> bool {
        self.by_id
            .read()
            .unwrap()
            .values()
            .any(|r| r.class_name == class_name)
    }

    /// Number of active probes.
    pub fn count(&self) -> usize {
        self.by_id.read().unwrap().len()
    }
}

fn location_key(class_name: &str, line_number: u32) -> String {
    format!("{class_name}:{line_number}")
}
