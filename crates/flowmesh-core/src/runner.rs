//! `SyncRunner` (spec §4.2), grounded in
//! `original_source/src/stream_kernel/execution/runtime/runner.py`: a
//! single-threaded cooperative drain loop that pops one envelope at a time,
//! resolves its node's context view, invokes the node, and routes every
//! output before popping the next envelope. Determinism rests entirely on
//! that "fully execute and route before the next pop" ordering.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{reserved, ContextService, ContextValue, Metadata};
use crate::contract::Payload;
use crate::envelope::{Envelope, NodeOutput};
use crate::error::RunnerError;
use crate::observability::ObservabilityService;
use crate::reply::ReplyCoordinator;
use crate::router::RoutingService;

/// Sink delivery ordering (spec §4.2). `Completion` delivers in whatever
/// order nodes finish producing output; `SourceSeq` requires every
/// `sink:`-prefixed node to have a `__seq` context key and is meant to be
/// paired with an upstream node that assigns one in source order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderedSinkMode {
    Completion,
    SourceSeq,
}

/// A runnable unit the graph invokes by name. The contract mirrors the
/// source's `(payload, ctx) -> iterable[output]`, except failures are a
/// `Result` instead of a raised exception.
pub trait Node: Send + Sync {
    fn invoke(&self, payload: Payload, ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait WorkQueue: Send + Sync {
    fn push(&self, envelope: Envelope);
    fn pop(&self) -> Option<Envelope>;
}

/// FIFO `WorkQueue` (spec §4.2's `QueuePort`, single-process variant).
#[derive(Default)]
pub struct InMemoryWorkQueue {
    queue: Mutex<VecDeque<Envelope>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkQueue for InMemoryWorkQueue {
    fn push(&self, envelope: Envelope) {
        self.queue.lock().push_back(envelope);
    }

    fn pop(&self) -> Option<Envelope> {
        self.queue.lock().pop_front()
    }
}

/// Receives routed deliveries the local [`crate::router::NodeLocator`]
/// reports as living in another process group. The multi-process supervisor
/// (`flowmesh-runtime`) is the only production implementation; tests can use
/// a simple recording stub.
pub trait BoundarySink: Send + Sync {
    fn dispatch(&self, target: String, payload: Payload, trace_id: String, reply_to: Option<String>, span_id: Option<String>);
}

/// Receives every [`NodeOutput::Terminal`] a node emits, with its full
/// status/payload/error and correlation metadata intact — a second,
/// unconditional observer of terminal events alongside the optional
/// [`ReplyCoordinator`]. A single-process runtime has no use for this (the
/// reply coordinator is the terminal sink of record there); a worker
/// process rebuilding its slice of the graph from a
/// `ChildBootstrapBundle` has no local waiter to complete, so it installs
/// one of these to collect the real `TerminalEvent`s a boundary dispatch
/// batch produced, instead of synthesizing placeholder outcomes.
pub trait TerminalSink: Send + Sync {
    fn terminal(&self, trace_id: String, reply_to: Option<String>, span_id: Option<String>, event: TerminalEvent);
}

/// Either a bare payload or a fully-addressed envelope; what `run_inputs`
/// accepts per entry (spec §4.2 `run_inputs`).
pub enum RunInput {
    Payload(Payload),
    Envelope(Envelope),
}

/// Synchronous, single-threaded execution engine (spec §4.2). Does not own
/// dependency lifecycle — every collaborator is injected, matching the
/// source's DI-resolved fields.
pub struct SyncRunner {
    nodes: HashMap<String, Arc<dyn Node>>,
    work_queue: Arc<dyn WorkQueue>,
    router: Arc<dyn RoutingService>,
    context: Arc<dyn ContextService>,
    observability: Arc<dyn ObservabilityService>,
    reply: Option<Arc<dyn ReplyCoordinator>>,
    boundary_sink: Option<Arc<dyn BoundarySink>>,
    terminal_sink: Option<Arc<dyn TerminalSink>>,
    full_context_nodes: HashSet<String>,
    ordered_sink_mode: OrderedSinkMode,
}

pub struct SyncRunnerBuilder {
    nodes: HashMap<String, Arc<dyn Node>>,
    work_queue: Arc<dyn WorkQueue>,
    router: Arc<dyn RoutingService>,
    context: Arc<dyn ContextService>,
    observability: Arc<dyn ObservabilityService>,
    reply: Option<Arc<dyn ReplyCoordinator>>,
    boundary_sink: Option<Arc<dyn BoundarySink>>,
    terminal_sink: Option<Arc<dyn TerminalSink>>,
    full_context_nodes: HashSet<String>,
    ordered_sink_mode: OrderedSinkMode,
}

impl SyncRunnerBuilder {
    pub fn new(
        work_queue: Arc<dyn WorkQueue>,
        router: Arc<dyn RoutingService>,
        context: Arc<dyn ContextService>,
        observability: Arc<dyn ObservabilityService>,
    ) -> Self {
        Self {
            nodes: HashMap::new(),
            work_queue,
            router,
            context,
            observability,
            reply: None,
            boundary_sink: None,
            terminal_sink: None,
            full_context_nodes: HashSet::new(),
            ordered_sink_mode: OrderedSinkMode::Completion,
        }
    }

    pub fn with_node(mut self, name: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    pub fn with_full_context_node(mut self, name: impl Into<String>) -> Self {
        self.full_context_nodes.insert(name.into());
        self
    }

    pub fn with_reply_coordinator(mut self, reply: Arc<dyn ReplyCoordinator>) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn with_boundary_sink(mut self, sink: Arc<dyn BoundarySink>) -> Self {
        self.boundary_sink = Some(sink);
        self
    }

    pub fn with_terminal_sink(mut self, sink: Arc<dyn TerminalSink>) -> Self {
        self.terminal_sink = Some(sink);
        self
    }

    pub fn with_ordered_sink_mode(mut self, mode: OrderedSinkMode) -> Self {
        self.ordered_sink_mode = mode;
        self
    }

    pub fn build(self) -> SyncRunner {
        SyncRunner {
            nodes: self.nodes,
            work_queue: self.work_queue,
            router: self.router,
            context: self.context,
            observability: self.observability,
            reply: self.reply,
            boundary_sink: self.boundary_sink,
            terminal_sink: self.terminal_sink,
            full_context_nodes: self.full_context_nodes,
            ordered_sink_mode: self.ordered_sink_mode,
        }
    }
}

const SINK_PREFIX: &str = "sink:";

impl SyncRunner {
    fn trace_id_for(run_id: &str, index: usize) -> String {
        format!("{run_id}:{index}")
    }

    fn filtered_context(&self, node_name: &str, full_ctx: &Metadata) -> Metadata {
        if self.full_context_nodes.contains(node_name) {
            full_ctx.clone()
        } else {
            full_ctx
                .iter()
                .filter(|(key, _)| !key.starts_with("__"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        }
    }

    /// Drains the queue until empty. Each popped envelope is fully executed
    /// and routed before the next pop (spec §4.2 determinism invariant).
    pub fn run(&self) -> Result<(), RunnerError> {
        while let Some(envelope) = self.work_queue.pop() {
            self.step(envelope)?;
        }
        Ok(())
    }

    fn step(&self, envelope: Envelope) -> Result<(), RunnerError> {
        let target = envelope.target.clone().ok_or(RunnerError::MissingTarget)?;
        let node = self.nodes.get(&target).cloned().ok_or_else(|| RunnerError::UnknownNode(target.clone()))?;
        let trace_id = envelope.trace_id.clone().unwrap_or_default();

        let is_sink_node = target.starts_with(SINK_PREFIX);
        let full_ctx = self.context.metadata(&trace_id, true);
        if self.ordered_sink_mode == OrderedSinkMode::SourceSeq && is_sink_node {
            let has_seq = full_ctx.get(reserved::SEQ).and_then(ContextValue::as_int).is_some();
            if !has_seq {
                return Err(RunnerError::MissingSeq(target));
            }
        }

        let mut node_ctx = self.filtered_context(&target, &full_ctx);
        if let Some(span_id) = envelope.span_id.clone().filter(|s| !s.is_empty()) {
            node_ctx.insert(reserved::PARENT_SPAN_ID.to_string(), ContextValue::Str(span_id));
        }

        let observer_state = self.observability.before_node(&target, &trace_id, &envelope.payload, &node_ctx);

        let outputs = match node.invoke(envelope.payload.clone(), &node_ctx) {
            Ok(outputs) => outputs,
            Err(source) => {
                self.observability.on_node_error(&target, &trace_id, &source.to_string(), &observer_state);
                return Err(RunnerError::NodeFailed { node: target, source });
            }
        };
        self.observability.after_node(&target, &trace_id, &outputs, &observer_state);

        for output in outputs {
            if let NodeOutput::Terminal(terminal) = output {
                let resolved_trace_id = trace_id.clone();
                self.observability.on_terminal_event(&resolved_trace_id, &terminal);
                if let Some(sink) = &self.terminal_sink {
                    sink.terminal(resolved_trace_id.clone(), envelope.reply_to.clone(), envelope.span_id.clone(), terminal.clone());
                }
                if let Some(reply) = &self.reply {
                    if !reply.complete(&resolved_trace_id, terminal) {
                        tracing::warn!(trace_id = resolved_trace_id.as_str(), reason = "duplicate_or_late", "reply dropped");
                    }
                }
                continue;
            }

            let (explicit_trace_id, explicit_reply_to, explicit_span_id) = match &output {
                NodeOutput::Envelope(env) => (env.trace_id.clone(), env.reply_to.clone(), env.span_id.clone()),
                NodeOutput::Payload(_) => (None, None, None),
                NodeOutput::Terminal(_) => unreachable!("terminal outputs are handled above"),
            };
            let downstream_trace_id = explicit_trace_id.unwrap_or_else(|| trace_id.clone());
            let downstream_reply_to = explicit_reply_to.or_else(|| envelope.reply_to.clone());
            let downstream_span_id = explicit_span_id.or_else(|| observer_state.span_id.clone());

            let routing_result = self.router.route(vec![output], Some(&target))?;
            tracing::trace!(
                trace_id = downstream_trace_id.as_str(),
                from = target.as_str(),
                targets = ?routing_result.local_deliveries.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
                "routed"
            );

            for (target_name, payload) in routing_result.local_deliveries {
                self.work_queue.push(Envelope {
                    payload,
                    target: Some(target_name),
                    trace_id: Some(downstream_trace_id.clone()),
                    reply_to: downstream_reply_to.clone(),
                    span_id: downstream_span_id.clone(),
                });
            }
            for (target_name, payload) in routing_result.boundary_deliveries {
                tracing::debug!(trace_id = downstream_trace_id.as_str(), group = target_name.as_str(), "dispatched across boundary");
                if let Some(sink) = &self.boundary_sink {
                    sink.dispatch(
                        target_name,
                        payload,
                        downstream_trace_id.clone(),
                        downstream_reply_to.clone(),
                        downstream_span_id.clone(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Bootstraps entrypoint payloads: seeds context, routes (or targets)
    /// the first hop, then drains the queue end-to-end per input (spec §4.2
    /// `run_inputs` — "message-by-message" deterministic processing).
    pub fn run_inputs(&self, inputs: Vec<RunInput>, run_id: &str, scenario_id: &str) -> Result<(), RunnerError> {
        let result = self.run_inputs_inner(inputs, run_id, scenario_id);
        self.observability.on_run_end();
        result
    }

    fn run_inputs_inner(&self, inputs: Vec<RunInput>, run_id: &str, scenario_id: &str) -> Result<(), RunnerError> {
        for (position, input) in inputs.into_iter().enumerate() {
            let index = position + 1;
            match input {
                RunInput::Envelope(seed) => {
                    let trace_id = seed.trace_id.clone().unwrap_or_else(|| Self::trace_id_for(run_id, index));
                    self.context.seed(&trace_id, seed.payload.clone(), run_id, scenario_id, seed.reply_to.as_deref());
                    self.observability.on_ingress(&trace_id, seed.reply_to.as_deref());

                    if let Some(target) = seed.target.clone() {
                        self.work_queue.push(Envelope {
                            payload: seed.payload,
                            target: Some(target),
                            trace_id: Some(trace_id),
                            reply_to: seed.reply_to,
                            span_id: seed.span_id,
                        });
                    } else {
                        let routing_result = self.router.route(vec![NodeOutput::Payload(seed.payload)], None)?;
                        for (target_name, payload) in routing_result.local_deliveries {
                            self.work_queue.push(Envelope {
                                payload,
                                target: Some(target_name),
                                trace_id: Some(trace_id.clone()),
                                reply_to: seed.reply_to.clone(),
                                span_id: seed.span_id.clone(),
                            });
                        }
                    }
                    self.run()?;
                }
                RunInput::Payload(payload) => {
                    let trace_id = Self::trace_id_for(run_id, index);
                    self.context.seed(&trace_id, payload.clone(), run_id, scenario_id, None);
                    self.observability.on_ingress(&trace_id, None);
                    let routing_result = self.router.route(vec![NodeOutput::Payload(payload)], None)?;
                    for (target_name, routed_payload) in routing_result.local_deliveries {
                        self.work_queue.push(Envelope {
                            payload: routed_payload,
                            target: Some(target_name),
                            trace_id: Some(trace_id.clone()),
                            reply_to: None,
                            span_id: None,
                        });
                    }
                    self.run()?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InMemoryContextService;
    use crate::observability::NoOpObservability;
    use crate::registry::ConsumerRegistry;
    use crate::router::Router;
    use std::sync::Mutex as StdMutex;

    struct RecordingNode {
        label: &'static str,
        seen: Arc<StdMutex<Vec<&'static str>>>,
        emits: Vec<NodeOutput>,
    }

    impl Node for RecordingNode {
        fn invoke(&self, _payload: Payload, _ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
            self.seen.lock().unwrap().push(self.label);
            Ok(self
                .emits
                .iter()
                .map(|output| match output {
                    NodeOutput::Payload(p) => NodeOutput::Payload(p.clone()),
                    NodeOutput::Envelope(e) => NodeOutput::Envelope(e.clone()),
                    NodeOutput::Terminal(_) => unreachable!("tests don't clone terminals"),
                })
                .collect())
        }
    }

    struct X;

    fn registry_with(consumers: Vec<&str>) -> Arc<parking_lot::RwLock<ConsumerRegistry>> {
        let mut registry = ConsumerRegistry::new();
        registry.register(crate::contract::TypeTag::of::<X>(), consumers.into_iter().map(String::from).collect());
        Arc::new(parking_lot::RwLock::new(registry))
    }

    #[test]
    fn fans_out_a_node_output_to_every_consumer() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let payload: Payload = Arc::new(0u8);

        let node_a = Arc::new(RecordingNode {
            label: "A",
            seen: seen.clone(),
            emits: vec![NodeOutput::Payload(payload.clone())],
        });
        let node_b = Arc::new(RecordingNode {
            label: "B",
            seen: seen.clone(),
            emits: vec![],
        });
        let node_c = Arc::new(RecordingNode {
            label: "C",
            seen: seen.clone(),
            emits: vec![],
        });

        let work_queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let router: Arc<dyn RoutingService> = Arc::new(Router::new(registry_with(vec!["B", "C"]), true));
        let context: Arc<dyn ContextService> = Arc::new(InMemoryContextService::new());
        let observability: Arc<dyn ObservabilityService> = Arc::new(NoOpObservability);

        let runner = SyncRunnerBuilder::new(work_queue.clone(), router, context, observability)
            .with_node("A", node_a)
            .with_node("B", node_b)
            .with_node("C", node_c)
            .build();

        work_queue.push(Envelope::new(payload).with_target("A").with_trace_id("t1"));
        runner.run().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn explicit_target_overrides_default_fan_out() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let payload: Payload = Arc::new(0u8);

        let node_a = Arc::new(RecordingNode {
            label: "A",
            seen: seen.clone(),
            emits: vec![NodeOutput::Envelope(Envelope::new(Arc::new(1u8)).with_target("C"))],
        });
        let node_b = Arc::new(RecordingNode {
            label: "B",
            seen: seen.clone(),
            emits: vec![],
        });
        let node_c = Arc::new(RecordingNode {
            label: "C",
            seen: seen.clone(),
            emits: vec![],
        });

        let work_queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let router: Arc<dyn RoutingService> = Arc::new(Router::new(registry_with(vec!["B", "C"]), true));
        let context: Arc<dyn ContextService> = Arc::new(InMemoryContextService::new());
        let observability: Arc<dyn ObservabilityService> = Arc::new(NoOpObservability);

        let runner = SyncRunnerBuilder::new(work_queue.clone(), router, context, observability)
            .with_node("A", node_a)
            .with_node("B", node_b)
            .with_node("C", node_c)
            .build();

        work_queue.push(Envelope::new(payload).with_target("A").with_trace_id("t1"));
        runner.run().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["A", "C"]);
    }

    #[test]
    fn source_seq_mode_requires_seq_on_sink_nodes() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let payload: Payload = Arc::new(0u8);
        let sink = Arc::new(RecordingNode {
            label: "sink:out",
            seen: seen.clone(),
            emits: vec![],
        });

        let work_queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let router: Arc<dyn RoutingService> = Arc::new(Router::new(registry_with(vec![]), true));
        let context: Arc<dyn ContextService> = Arc::new(InMemoryContextService::new());
        let observability: Arc<dyn ObservabilityService> = Arc::new(NoOpObservability);

        let runner = SyncRunnerBuilder::new(work_queue.clone(), router, context, observability)
            .with_node("sink:out", sink)
            .with_ordered_sink_mode(OrderedSinkMode::SourceSeq)
            .build();

        work_queue.push(Envelope::new(payload).with_target("sink:out").with_trace_id("t1"));
        let err = runner.run().unwrap_err();
        assert!(matches!(err, RunnerError::MissingSeq(name) if name == "sink:out"));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let work_queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let router: Arc<dyn RoutingService> = Arc::new(Router::new(registry_with(vec![]), true));
        let context: Arc<dyn ContextService> = Arc::new(InMemoryContextService::new());
        let observability: Arc<dyn ObservabilityService> = Arc::new(NoOpObservability);
        let runner = SyncRunnerBuilder::new(work_queue.clone(), router, context, observability).build();

        work_queue.push(Envelope::new(Arc::new(0u8)).with_target("Missing").with_trace_id("t1"));
        let err = runner.run().unwrap_err();
        assert!(matches!(err, RunnerError::UnknownNode(name) if name == "Missing"));
    }
}
