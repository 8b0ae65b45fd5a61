//! `ObservabilityService` (spec §4.6): a fan-out event sink with per-observer
//! failure isolation, grounded in
//! `original_source/src/stream_kernel/observability/observers/tracing.py`
//! (a misbehaving observer must never take down the run it's watching).
//!
//! The source's `TracingObserver` is duck-typed: it implements whichever of
//! `before_node`/`after_node`/`on_node_error`/`on_ingress`/`on_terminal_event`/
//! `on_run_end` it cares about, and the caller probes for the rest. Rust has
//! no duck typing, so each hook gets a default no-op body instead — an
//! observer overrides only the ones it needs (spec §9 "capability probing").

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::Metadata;
use crate::contract::Payload;
use crate::envelope::{NodeOutput, TerminalEvent};
use crate::reply::ReplyCoordinator;

/// Carried from `before_node` into `after_node`/`on_node_error` for the same
/// invocation. `span_id` is the correlation id an observer assigned at entry
/// (e.g. a tracing span), not the envelope's own `span_id` field — a node
/// with no configured tracing observer simply carries `None` through.
#[derive(Clone, Default)]
pub struct ObserverState {
    pub span_id: Option<String>,
    /// Per-observer states for `FanoutObservability`; opaque to callers.
    child_states: Vec<ObserverState>,
}

impl ObserverState {
    pub fn with_span_id(span_id: impl Into<String>) -> Self {
        Self {
            span_id: Some(span_id.into()),
            child_states: Vec::new(),
        }
    }
}

/// Spec §4.6's six capability-probed lifecycle hooks. Every method has a
/// no-op default; implementors override only the ones they care about.
pub trait ObservabilityService: Send + Sync {
    /// Called just before a node is invoked. The returned state is handed
    /// back unchanged to `after_node`/`on_node_error` for the same call.
    fn before_node(&self, _node: &str, _trace_id: &str, _payload: &Payload, _ctx: &Metadata) -> ObserverState {
        ObserverState::default()
    }

    fn after_node(&self, _node: &str, _trace_id: &str, _outputs: &[NodeOutput], _state: &ObserverState) {}

    fn on_node_error(&self, _node: &str, _trace_id: &str, _error: &str, _state: &ObserverState) {}

    /// Called once per `run_inputs` entry, before the first hop is routed.
    fn on_ingress(&self, _trace_id: &str, _reply_to: Option<&str>) {}

    fn on_terminal_event(&self, _trace_id: &str, _event: &TerminalEvent) {}

    /// Called once `run_inputs` has drained every entry it was given.
    fn on_run_end(&self) {}
}

/// Discards every event. Default for tests and for runs that opt out of
/// observability entirely.
pub struct NoOpObservability;
impl ObservabilityService for NoOpObservability {}

static SPAN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Emits every hook as a `tracing` event at `debug`/`warn` level and mints a
/// deterministic per-invocation span id so `after_node`/`on_node_error` can
/// correlate back to the same `before_node` call.
pub struct TracingObservability;

impl ObservabilityService for TracingObservability {
    fn before_node(&self, node: &str, trace_id: &str, _payload: &Payload, _ctx: &Metadata) -> ObserverState {
        let seq = SPAN_SEQ.fetch_add(1, Ordering::Relaxed);
        let span_id = format!("{trace_id}:{node}:{seq}");
        tracing::debug!(trace_id, node, span_id = %span_id, "node started");
        ObserverState::with_span_id(span_id)
    }

    fn after_node(&self, node: &str, trace_id: &str, outputs: &[NodeOutput], state: &ObserverState) {
        tracing::debug!(trace_id, node, span_id = ?state.span_id, output_count = outputs.len(), "node completed");
    }

    fn on_node_error(&self, node: &str, trace_id: &str, error: &str, state: &ObserverState) {
        tracing::warn!(trace_id, node, span_id = ?state.span_id, error, "node failed");
    }

    fn on_ingress(&self, trace_id: &str, reply_to: Option<&str>) {
        tracing::debug!(trace_id, reply_to, "ingress");
    }

    fn on_terminal_event(&self, trace_id: &str, event: &TerminalEvent) {
        tracing::debug!(trace_id, status = ?event.status, "terminal event");
    }

    fn on_run_end(&self) {
        tracing::debug!("run ended");
    }
}

/// Fans every hook out to each observer, catching panics per-observer so one
/// misbehaving observer never blocks the rest (spec §12 "Fan-out observer
/// isolation").
#[derive(Clone, Default)]
pub struct FanoutObservability {
    observers: Vec<Arc<dyn ObservabilityService>>,
}

impl FanoutObservability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, observer: Arc<dyn ObservabilityService>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ObservabilityService for FanoutObservability {
    fn before_node(&self, node: &str, trace_id: &str, payload: &Payload, ctx: &Metadata) -> ObserverState {
        let mut span_id = None;
        let mut child_states = Vec::with_capacity(self.observers.len());
        for observer in &self.observers {
            let state = catch_unwind(AssertUnwindSafe(|| observer.before_node(node, trace_id, payload, ctx))).unwrap_or_else(|_| {
                tracing::error!("observer panicked in before_node; isolated");
                ObserverState::default()
            });
            if span_id.is_none() {
                span_id = state.span_id.clone();
            }
            child_states.push(state);
        }
        ObserverState { span_id, child_states }
    }

    fn after_node(&self, node: &str, trace_id: &str, outputs: &[NodeOutput], state: &ObserverState) {
        let empty = ObserverState::default();
        for (index, observer) in self.observers.iter().enumerate() {
            let child = state.child_states.get(index).unwrap_or(&empty);
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.after_node(node, trace_id, outputs, child)));
            if outcome.is_err() {
                tracing::error!("observer panicked in after_node; isolated");
            }
        }
    }

    fn on_node_error(&self, node: &str, trace_id: &str, error: &str, state: &ObserverState) {
        let empty = ObserverState::default();
        for (index, observer) in self.observers.iter().enumerate() {
            let child = state.child_states.get(index).unwrap_or(&empty);
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_node_error(node, trace_id, error, child)));
            if outcome.is_err() {
                tracing::error!("observer panicked in on_node_error; isolated");
            }
        }
    }

    fn on_ingress(&self, trace_id: &str, reply_to: Option<&str>) {
        for observer in &self.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_ingress(trace_id, reply_to)));
            if outcome.is_err() {
                tracing::error!("observer panicked in on_ingress; isolated");
            }
        }
    }

    fn on_terminal_event(&self, trace_id: &str, event: &TerminalEvent) {
        for observer in &self.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_terminal_event(trace_id, event)));
            if outcome.is_err() {
                tracing::error!("observer panicked in on_terminal_event; isolated");
            }
        }
    }

    fn on_run_end(&self) {
        for observer in &self.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_run_end()));
            if outcome.is_err() {
                tracing::error!("observer panicked in on_run_end; isolated");
            }
        }
    }
}

/// Decorates an [`ObservabilityService`] and drives a [`ReplyCoordinator`]'s
/// register/complete from the `on_ingress`/`on_terminal_event` lifecycle
/// points, the pairing `tracing.py`'s `TracingObserver` uses to finalize a
/// run's reply sink (spec §4.6 "ReplyAware decorator"). `register` errors
/// (no `reply_to`, duplicate registration) are the coordinator's own
/// diagnostics concern and are swallowed here rather than surfaced.
pub struct ReplyAwareObservability {
    inner: Arc<dyn ObservabilityService>,
    reply: Arc<dyn ReplyCoordinator>,
    default_timeout_seconds: u64,
}

impl ReplyAwareObservability {
    pub fn new(inner: Arc<dyn ObservabilityService>, reply: Arc<dyn ReplyCoordinator>, default_timeout_seconds: u64) -> Self {
        Self {
            inner,
            reply,
            default_timeout_seconds,
        }
    }
}

impl ObservabilityService for ReplyAwareObservability {
    fn before_node(&self, node: &str, trace_id: &str, payload: &Payload, ctx: &Metadata) -> ObserverState {
        self.inner.before_node(node, trace_id, payload, ctx)
    }

    fn after_node(&self, node: &str, trace_id: &str, outputs: &[NodeOutput], state: &ObserverState) {
        self.inner.after_node(node, trace_id, outputs, state);
    }

    fn on_node_error(&self, node: &str, trace_id: &str, error: &str, state: &ObserverState) {
        self.inner.on_node_error(node, trace_id, error, state);
    }

    fn on_ingress(&self, trace_id: &str, reply_to: Option<&str>) {
        self.inner.on_ingress(trace_id, reply_to);
        if let Some(reply_to) = reply_to.filter(|r| !r.is_empty()) {
            if let Err(err) = self.reply.register(trace_id, reply_to, self.default_timeout_seconds) {
                tracing::debug!(trace_id, error = %err, "reply-aware ingress registration skipped");
            }
        }
    }

    fn on_terminal_event(&self, trace_id: &str, event: &TerminalEvent) {
        self.inner.on_terminal_event(trace_id, event);
        self.reply.complete(trace_id, event.clone());
    }

    fn on_run_end(&self) {
        self.inner.on_run_end();
    }
}
