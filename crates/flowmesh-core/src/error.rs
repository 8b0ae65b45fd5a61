//! Crate-wide error taxonomy for `flowmesh-core`.
//!
//! Mirrors the layering the teacher crate uses for its own `CoreError`:
//! one stable enum per concern, each variant naming the resource involved
//! (node, type, trace) without leaking payload contents.

use std::fmt;

/// Errors raised while building or validating a [`crate::dag::Dag`].
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("node '{0}' must declare a non-empty consumes or emits list")]
    EmptyContract(String),
    #[error("type '{type_name}' has no producers for consumers {consumers:?}")]
    MissingProvider {
        type_name: &'static str,
        consumers: Vec<String>,
    },
    #[error("cycle detected at node '{0}'")]
    Cycle(String),
    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),
}

/// Errors raised by [`crate::router::RoutingService::route`].
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no consumers registered for type '{0}' in strict mode")]
    NoConsumers(&'static str),
    #[error("explicit target '{target}' is not a registered consumer of type '{type_name}'")]
    UnknownTarget {
        target: String,
        type_name: &'static str,
    },
    #[error(
        "type '{type_name}' is consumed only by its own emitter '{node}'; strict mode requires an explicit target"
    )]
    SelfLoopRequiresTarget { node: String, type_name: &'static str },
}

/// Errors raised by the [`crate::runner::SyncRunner`] drain loop.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("envelope target must be set before execution")]
    MissingTarget,
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("sink node '{0}' requires __seq in context while ordered_sink_mode=source_seq")]
    MissingSeq(String),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised by [`crate::injection::InjectionRegistry`] and
/// [`crate::injection::ScenarioScope`].
#[derive(Debug, thiserror::Error)]
pub enum InjectionError {
    #[error("duplicate binding for {0}")]
    DuplicateBinding(BindingKeyDisplay),
    #[error("missing binding for {0}")]
    MissingBinding(BindingKeyDisplay),
    #[error("binding qualifier must be a non-empty string when provided")]
    EmptyQualifier,
    #[error("scope is closed")]
    ScopeClosed,
    #[error("kv binding for {0:?} must extend the base KV marker contract with no added methods")]
    InvalidKvMarker(&'static str),
}

/// Errors raised by [`crate::reply::ReplyCoordinator::register`].
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("trace_id must be a non-empty string")]
    EmptyTraceId,
    #[error("reply_to must be a non-empty string")]
    EmptyReplyTo,
    #[error("timeout_seconds must be > 0")]
    InvalidTimeout,
    #[error("waiter already registered for trace_id '{0}'")]
    AlreadyRegistered(String),
}

/// Display helper so error messages name the `(port_type, data_type, qualifier)` triple
/// without requiring callers to format it themselves.
#[derive(Debug)]
pub struct BindingKeyDisplay {
    pub port_type: &'static str,
    pub type_name: &'static str,
    pub qualifier: Option<String>,
}

impl fmt::Display for BindingKeyDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}<{}>#{}", self.port_type, self.type_name, q),
            None => write!(f, "{}<{}>", self.port_type, self.type_name),
        }
    }
}

impl BindingKeyDisplay {
    pub(crate) fn new(port_type: &'static str, type_name: &'static str, qualifier: Option<&str>) -> Self {
        Self {
            port_type,
            type_name,
            qualifier: qualifier.map(str::to_owned),
        }
    }
}
