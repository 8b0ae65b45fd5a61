//! `ChildBootstrap` (spec §4.11): rebuilds a full, runnable kernel inside a
//! worker process from nothing but a [`crate::bundle::ChildBootstrapBundle`].
//!
//! Grounded in `original_source/src/stream_kernel/platform/runtime/builder.py`'s
//! worker-side half: discover this process group's nodes, build a fresh
//! injection scope from the bundle's adapter bindings, and wire a
//! [`SyncRunner`] that only knows about nodes placed in this group —
//! everything else routes through [`GroupNodeLocator`] to the boundary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use flowmesh_core::contract::Payload;
use flowmesh_core::context::{reserved, ContextService, ContextValue, InMemoryContextService};
use flowmesh_core::dag::{build_dag, Dag};
use flowmesh_core::envelope::{Envelope, TerminalEvent};
use flowmesh_core::error::RunnerError;
use flowmesh_core::injection::{InjectionRegistry, KvMarker, ScenarioScope};
use flowmesh_core::observability::{FanoutObservability, ObservabilityService, TracingObservability};
use flowmesh_core::registry::ConsumerRegistry;
use flowmesh_core::router::{NodeLocator, Router, RoutingService};
use flowmesh_core::runner::{BoundarySink, InMemoryWorkQueue, RunInput, SyncRunner, SyncRunnerBuilder, TerminalSink, WorkQueue};

use crate::adapter::{AdapterFactoryRegistry, SourceAdapter};
use crate::bundle::ChildBootstrapBundle;
use crate::config::RuntimeConfig;
use crate::discovery::DiscoveryModuleRegistry;
use crate::error::ChildRuntimeBootstrapError;

/// A marker KV implementation used only when `kv.backend = "memory"` and no
/// adapter has bound anything more specific (spec §6 "framework defaults").
struct InMemoryKv;
impl KvMarker for InMemoryKv {}

/// Resolves a node name to "local to this process group" by consulting the
/// full `runtime.platform.process_groups` placement table (spec §4.10
/// "Target → group resolution"). Unassigned nodes (not named in any group)
/// are treated as local, matching single-process behavior when the config
/// declares no groups at all.
pub struct GroupNodeLocator {
    local_group: String,
    placement: HashMap<String, String>,
}

impl GroupNodeLocator {
    pub fn new(local_group: impl Into<String>, process_groups: &[crate::config::ProcessGroupConfig]) -> Self {
        let mut placement = HashMap::new();
        for group in process_groups {
            for node in &group.nodes {
                placement.insert(node.clone(), group.name.clone());
            }
        }
        Self {
            local_group: local_group.into(),
            placement,
        }
    }

    pub fn group_of(&self, node: &str) -> Option<&str> {
        self.placement.get(node).map(String::as_str)
    }
}

impl NodeLocator for GroupNodeLocator {
    fn is_local(&self, node: &str) -> bool {
        match self.placement.get(node) {
            Some(group) => group == &self.local_group,
            None => true,
        }
    }
}

/// Forwards boundary-bound deliveries by recording them; a real worker
/// relays these back to the parent supervisor's `execute_boundary` loop
/// over the control channel it was bootstrapped with.
pub struct RecordingBoundarySink {
    pub dispatches: parking_lot::Mutex<Vec<(String, Payload, String, Option<String>, Option<String>)>>,
}

impl Default for RecordingBoundarySink {
    fn default() -> Self {
        Self {
            dispatches: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl BoundarySink for RecordingBoundarySink {
    fn dispatch(&self, target: String, payload: Payload, trace_id: String, reply_to: Option<String>, span_id: Option<String>) {
        self.dispatches.lock().push((target, payload, trace_id, reply_to, span_id));
    }
}

/// Collects every real [`TerminalEvent`] a node in this process emits,
/// status/payload/error and all, for [`execute_child_boundary_loop`] to
/// hand back to the parent supervisor (spec §4.11: "TerminalEvent -> emit
/// as Envelope with preserved trace_id/reply_to/span_id").
pub struct RecordingTerminalSink {
    pub events: parking_lot::Mutex<Vec<(String, Option<String>, Option<String>, TerminalEvent)>>,
}

impl Default for RecordingTerminalSink {
    fn default() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl TerminalSink for RecordingTerminalSink {
    fn terminal(&self, trace_id: String, reply_to: Option<String>, span_id: Option<String>, event: TerminalEvent) {
        self.events.lock().push((trace_id, reply_to, span_id, event));
    }
}

/// Everything a worker process needs to run its slice of the graph.
pub struct ChildRuntimeArtifacts {
    pub runner: Arc<SyncRunner>,
    pub work_queue: Arc<dyn WorkQueue>,
    pub context: Arc<dyn ContextService>,
    pub scope: Arc<ScenarioScope>,
    pub boundary_sink: Arc<RecordingBoundarySink>,
    pub terminal_sink: Arc<RecordingTerminalSink>,
    pub dag: Dag,
    pub locator: Arc<GroupNodeLocator>,
}

/// `bootstrap_child_runtime_from_bundle` (spec §4.11): discovers this
/// process's nodes, rebuilds the injection scope from the bundle's adapter
/// bindings, and wires a [`SyncRunner`] scoped to `bundle.process_group`.
pub fn bootstrap_child_runtime_from_bundle(
    bundle: &ChildBootstrapBundle,
    discovery_modules: &DiscoveryModuleRegistry,
    adapter_factories: &AdapterFactoryRegistry,
) -> Result<ChildRuntimeArtifacts, ChildRuntimeBootstrapError> {
    let config: RuntimeConfig = serde_json::from_value(bundle.runtime_config.clone())
        .map_err(|e| ChildRuntimeBootstrapError::MissingCollaborator(format!("runtime_config: {e}")))?;

    let mut discovery = discovery_modules
        .discover(&bundle.discovery_modules)
        .map_err(|missing| ChildRuntimeBootstrapError::MissingCollaborator(format!("discovery module '{missing}' not registered")))?;

    let mut injection = InjectionRegistry::new();
    if config.runtime.platform.kv.backend == "memory" {
        let _ = injection.register_kv(|| InMemoryKv, Default::default());
    }

    let adapters_settings: HashMap<String, crate::config::AdapterConfig> = serde_json::from_value(bundle.adapters.clone())
        .map_err(|e| ChildRuntimeBootstrapError::MissingCollaborator(format!("adapters: {e}")))?;
    for (role, adapter_config) in &adapters_settings {
        let factory = adapter_factories
            .get(role)
            .ok_or_else(|| ChildRuntimeBootstrapError::MissingCollaborator(format!("adapter factory for role '{role}'")))?;
        let registration = factory
            .build(&adapter_config.settings, &mut injection)
            .map_err(|e| ChildRuntimeBootstrapError::MissingCollaborator(e.to_string()))?;
        discovery.register_adapter(registration);
    }

    let dag = build_dag(&discovery.contracts()).map_err(|e| ChildRuntimeBootstrapError::MissingCollaborator(e.to_string()))?;

    let mut consumer_registry = ConsumerRegistry::new();
    for registration in discovery.nodes() {
        for ty in &registration.contract.consumes {
            consumer_registry.append(*ty, registration.contract.name.clone());
        }
    }
    for adapter in discovery.adapters() {
        for ty in &adapter.consumes {
            consumer_registry.append(*ty, adapter.name.clone());
        }
    }

    let locator = Arc::new(GroupNodeLocator::new(bundle.process_group.clone(), &config.runtime.platform.process_groups));
    let router: Arc<dyn RoutingService> = Arc::new(
        Router::new(Arc::new(parking_lot::RwLock::new(consumer_registry)), config.runtime.strict).with_locator(locator.clone()),
    );

    let context: Arc<dyn ContextService> = Arc::new(InMemoryContextService::new());
    let observability: Arc<dyn ObservabilityService> =
        Arc::new(FanoutObservability::new().add(Arc::new(TracingObservability)));
    let work_queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
    let boundary_sink = Arc::new(RecordingBoundarySink::default());
    // No reply waiter is ever registered inside a worker process — it has no
    // external caller of its own to correlate back to — so terminal events
    // are captured here instead of through a `ReplyCoordinator` (spec §4.11).
    let terminal_sink = Arc::new(RecordingTerminalSink::default());

    let scope = Arc::new(injection.instantiate_for_scenario());

    let mut builder = SyncRunnerBuilder::new(work_queue.clone(), router, context.clone(), observability)
        .with_boundary_sink(boundary_sink.clone())
        .with_terminal_sink(terminal_sink.clone())
        .with_ordered_sink_mode(config.runtime.ordering.sink_mode.into());

    let group_nodes: HashSet<&str> = config
        .runtime
        .platform
        .process_groups
        .iter()
        .find(|g| g.name == bundle.process_group)
        .map(|g| g.nodes.iter().map(String::as_str).collect())
        .unwrap_or_default();

    for registration in discovery.nodes() {
        if !group_nodes.is_empty() && !group_nodes.contains(registration.contract.name.as_str()) {
            continue;
        }
        builder = builder.with_node(registration.contract.name.clone(), registration.node.clone());
        if registration.service {
            builder = builder.with_full_context_node(registration.contract.name.clone());
        }
    }

    Ok(ChildRuntimeArtifacts {
        runner: Arc::new(builder.build()),
        work_queue,
        context,
        scope,
        boundary_sink,
        terminal_sink,
        dag,
        locator,
    })
}

/// Reads every payload a source adapter yields and runs it through the
/// graph to completion before pulling the next one (spec §13's
/// "source-ingress back-pressure: once per drained run() cycle" decision —
/// each `run_inputs` call here fully drains the queue before `read()` is
/// called again).
pub fn drain_source(runner: &SyncRunner, source: &dyn SourceAdapter, run_id: &str, scenario_id: &str) -> Result<usize, RunnerError> {
    let mut drained = 0;
    while let Some(payload) = source.read() {
        runner.run_inputs(vec![RunInput::Payload(payload)], &format!("{run_id}:{drained}"), scenario_id)?;
        drained += 1;
    }
    Ok(drained)
}

/// `execute_child_boundary_loop` (spec §4.11): runs one batch of inbound
/// boundary dispatches through this process's runner, enriching context
/// with the cross-group handoff metadata spec §4.10 names, and reports
/// back either terminal outputs or re-hop requests for targets this group
/// does not own.
pub fn execute_child_boundary_loop(
    artifacts: &ChildRuntimeArtifacts,
    inputs: Vec<crate::bundle::BoundaryDispatchInput>,
    run_id: &str,
    scenario_id: &str,
) -> Result<(Vec<(Option<String>, TerminalEvent)>, Vec<crate::bundle::BoundaryDispatchInput>), ChildRuntimeBootstrapError> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let mut rehop = Vec::new();
    for input in &inputs {
        let target = input.target.clone().ok_or_else(|| ChildRuntimeBootstrapError::UnknownTarget("<missing>".to_string()))?;
        if artifacts.locator.group_of(&target).is_some_and(|g| g != input.dispatch_group) {
            rehop.push(input.clone());
            continue;
        }

        let raw = BASE64
            .decode(&input.payload_b64)
            .map_err(|e| ChildRuntimeBootstrapError::UnknownTarget(format!("bad payload_b64: {e}")))?;
        let payload: Payload = Arc::new(raw);

        let trace_id = input.trace_id.clone().unwrap_or_else(|| format!("{run_id}:{target}"));
        artifacts.context.seed(&trace_id, payload.clone(), run_id, scenario_id, input.reply_to.as_deref());
        artifacts.context.set(&trace_id, reserved::PROCESS_GROUP, ContextValue::Str(artifacts.locator.group_of(&target).unwrap_or("").to_string()));
        if let Some(source_group) = &input.source_group {
            artifacts.context.set(&trace_id, reserved::HANDOFF_FROM, ContextValue::Str(source_group.clone()));
        }
        artifacts.context.set(&trace_id, reserved::ROUTE_HOP, ContextValue::Int(input.route_hop as i64));

        artifacts.work_queue.push(Envelope {
            payload,
            target: Some(target),
            trace_id: Some(trace_id),
            reply_to: input.reply_to.clone(),
            span_id: input.span_id.clone(),
        });
    }

    artifacts
        .runner
        .run()
        .map_err(ChildRuntimeBootstrapError::Runner)?;

    // Every real `TerminalEvent` a node emitted while draining this batch —
    // status, payload and error intact — rather than a synthesized success
    // for whatever happened to cross the boundary sink (spec §4.11:
    // "TerminalEvent -> emit as Envelope with preserved trace_id/reply_to/
    // span_id").
    let terminals = artifacts
        .terminal_sink
        .events
        .lock()
        .drain(..)
        .map(|(trace_id, _reply_to, _span_id, event)| (Some(trace_id), event))
        .collect();

    // A node in this batch may have routed to a target outside this group —
    // the router already separated those into the boundary sink instead of
    // the work queue. Each one becomes a fresh re-hop request rather than
    // silently vanishing; the parent supervisor's `execute_boundary` treats
    // it exactly like a pre-run misroute, bumping `route_hop` as it
    // re-dispatches (spec §4.10 step 4, §4.11).
    for (target, payload, trace_id, reply_to, span_id) in artifacts.boundary_sink.dispatches.lock().drain(..) {
        let bytes = payload
            .downcast_ref::<Vec<u8>>()
            .ok_or_else(|| ChildRuntimeBootstrapError::UnknownTarget(format!("payload routed to '{target}' is not byte-serializable for a boundary hop")))?
            .clone();
        let dispatch_group = artifacts
            .locator
            .group_of(&target)
            .ok_or_else(|| ChildRuntimeBootstrapError::UnknownTarget(target.clone()))?
            .to_string();
        rehop.push(crate::bundle::BoundaryDispatchInput {
            payload_b64: BASE64.encode(bytes),
            dispatch_group,
            target: Some(target),
            trace_id: Some(trace_id),
            reply_to,
            source_group: None,
            route_hop: 0,
            span_id,
        });
    }

    Ok((terminals, rehop))
}
