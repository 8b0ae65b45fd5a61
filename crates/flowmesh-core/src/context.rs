//! `ContextService` (spec §4.5): a per-trace key-value store scoped by
//! `trace_id`, with reserved `__`-prefixed keys that non-service nodes never
//! see (spec §4.3 step 3, §8 "Context isolation").

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::contract::Payload;

/// Reserved key names. Any key starting with `__` is internal; these are the
/// ones the kernel itself writes (spec §4.5).
pub mod reserved {
    pub const TRACE_ID: &str = "__trace_id";
    pub const RUN_ID: &str = "__run_id";
    pub const SCENARIO_ID: &str = "__scenario_id";
    pub const SEQ: &str = "__seq";
    pub const PARENT_SPAN_ID: &str = "__parent_span_id";
    pub const PROCESS_GROUP: &str = "__process_group";
    pub const HANDOFF_FROM: &str = "__handoff_from";
    pub const ROUTE_HOP: &str = "__route_hop";
}

/// A context metadata value. The kernel's own reserved keys are strings or
/// integers; `Payload` carries the opaque ingress payload (or anything a
/// node chooses to stash) without the context store needing to know its type.
#[derive(Clone)]
pub enum ContextValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Payload(Payload),
}

impl ContextValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ContextValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// A trace's full metadata row, returned (filtered or not) by `metadata()`.
pub type Metadata = HashMap<String, ContextValue>;

fn is_internal(key: &str) -> bool {
    key.starts_with("__")
}

/// Per-trace metadata store the [`crate::runner::SyncRunner`] reads context
/// from on every pop (spec §4.5). Implementations must be safely shared
/// across the single-threaded drain loop and whatever seeds new traces.
pub trait ContextService: Send + Sync {
    fn seed(&self, trace_id: &str, payload: Payload, run_id: &str, scenario_id: &str, reply_to: Option<&str>);
    fn metadata(&self, trace_id: &str, full: bool) -> Metadata;
    fn set(&self, trace_id: &str, key: &str, value: ContextValue);
    fn clear(&self, trace_id: &str);
}

/// In-memory `ContextService`. No TTL; rows are cleaned up at scope close
/// (spec §4.5) via [`InMemoryContextService::clear`].
#[derive(Default)]
pub struct InMemoryContextService {
    rows: Mutex<HashMap<String, Metadata>>,
}

impl InMemoryContextService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_all(&self) {
        self.rows.lock().clear();
    }
}

impl ContextService for InMemoryContextService {
    fn seed(&self, trace_id: &str, payload: Payload, run_id: &str, scenario_id: &str, reply_to: Option<&str>) {
        let mut row = Metadata::new();
        row.insert("payload".to_string(), ContextValue::Payload(payload));
        row.insert(reserved::TRACE_ID.to_string(), ContextValue::Str(trace_id.to_string()));
        row.insert(reserved::RUN_ID.to_string(), ContextValue::Str(run_id.to_string()));
        row.insert(reserved::SCENARIO_ID.to_string(), ContextValue::Str(scenario_id.to_string()));
        if let Some(reply_to) = reply_to {
            row.insert("reply_to".to_string(), ContextValue::Str(reply_to.to_string()));
        }
        self.rows.lock().insert(trace_id.to_string(), row);
    }

    fn metadata(&self, trace_id: &str, full: bool) -> Metadata {
        let rows = self.rows.lock();
        let row = match rows.get(trace_id) {
            Some(row) => row,
            None => return Metadata::new(),
        };
        if full {
            return row.clone();
        }
        row.iter()
            .filter(|(key, _)| !is_internal(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn set(&self, trace_id: &str, key: &str, value: ContextValue) {
        self.rows.lock().entry(trace_id.to_string()).or_default().insert(key.to_string(), value);
    }

    fn clear(&self, trace_id: &str) {
        self.rows.lock().remove(trace_id);
    }
}
