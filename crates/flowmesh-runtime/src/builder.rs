//! `RuntimeBuilder` (spec §4.13): top-level composition — discover, validate,
//! wire DI, materialize the scenario scope, and hand back everything
//! [`RuntimeBuilder::execute_runtime_artifacts`] needs to actually run a
//! scenario under whichever of the three execution profiles
//! `runtime.platform` config selects (spec §6 "Runtime configuration").
//!
//! Grounded in `original_source/src/stream_kernel/platform/runtime/builder.py`:
//! the eight numbered steps in spec §4.13 map directly onto
//! [`RuntimeBuilder::build`]'s body, in order, and its three named execution
//! profiles map onto [`RuntimeBuilder::execute_runtime_artifacts`]'s three
//! branches.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use flowmesh_core::contract::Payload;
use flowmesh_core::context::{ContextService, InMemoryContextService};
use flowmesh_core::dag::{build_dag, Dag};
use flowmesh_core::envelope::{Envelope, NodeOutput, TerminalEvent};
use flowmesh_core::injection::{InjectionRegistry, KvMarker, ScenarioScope};
use flowmesh_core::observability::{FanoutObservability, ObservabilityService, TracingObservability};
use flowmesh_core::registry::ConsumerRegistry;
use flowmesh_core::reply::{InMemoryReplyCoordinator, ReplyCoordinator};
use flowmesh_core::router::{Router, RoutingService};
use flowmesh_core::runner::{InMemoryWorkQueue, Node, RunInput, SyncRunner, SyncRunnerBuilder, WorkQueue};

use crate::adapter::{AdapterFactoryRegistry, SinkAdapter, SourceAdapter};
use crate::bundle::{BoundaryDispatchInput, ChildBootstrapBundle};
use crate::child::drain_source;
use crate::config::RuntimeConfig;
use crate::discovery::DiscoveryModuleRegistry;
use crate::discovery::DiscoveryRegistry;
use crate::error::{BoundaryError, ConfigError, LifecycleError, RuntimeError};
use crate::lifecycle::{emit, LifecycleEvent, LifecycleSink};
use crate::routecache::RouteCacheSettings;
use crate::supervisor::{BootstrapSupervisor, BoundaryTerminal, ProcessGroupSpec, StdWorkerProcessSpawner, WorkerProcessSpawner};

const BOUNDARY_TIMEOUT_SECONDS: u64 = 30;
const REPLY_TIMEOUT_SECONDS: u64 = 30;

struct InMemoryKv;
impl KvMarker for InMemoryKv {}

/// Wraps a [`SinkAdapter`] as a graph [`Node`] so it can be wired at the name
/// the adapter's own contract already uses (spec §4.13 step 7 "attach ...
/// sink-runtime nodes"). `consume` failures propagate as node failures;
/// success always reports a terminal output, matching spec §4.11's
/// "empty consumer set is treated as terminal boundary output".
struct SinkRuntimeNode {
    sink: Arc<dyn SinkAdapter>,
}

impl Node for SinkRuntimeNode {
    fn invoke(
        &self,
        payload: Payload,
        _ctx: &flowmesh_core::context::Metadata,
    ) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
        self.sink.consume(payload)?;
        Ok(vec![NodeOutput::Terminal(TerminalEvent::success(None))])
    }
}

/// Everything [`RuntimeBuilder::execute_runtime_artifacts`] needs to run one
/// scenario: the fully wired [`SyncRunner`] plus every collaborator it was
/// built from, and the source adapters still needing to be drained (spec
/// §4.13 step 8 "Return `RuntimeBuildArtifacts`").
pub struct RuntimeBuildArtifacts {
    pub runner: Arc<SyncRunner>,
    pub work_queue: Arc<dyn WorkQueue>,
    pub context: Arc<dyn ContextService>,
    pub reply: Arc<dyn ReplyCoordinator>,
    pub scope: Arc<ScenarioScope>,
    pub dag: Dag,
    pub config: RuntimeConfig,
    pub scenario_id: String,
    /// Adapters whose `read()` side this scenario should drain before
    /// reporting itself idle (spec §6 "adapter contract" `read()`).
    pub sources: Vec<(String, Arc<dyn SourceAdapter>)>,
}

/// One ingress payload handed to [`RuntimeBuilder::execute_runtime_artifacts`],
/// mirroring [`Envelope`] so a caller can address a target, carry a
/// trace_id, or ask for a correlated reply.
pub struct RuntimeEntrypoint {
    pub payload: Payload,
    pub target: Option<String>,
    pub trace_id: Option<String>,
    pub reply_to: Option<String>,
    pub span_id: Option<String>,
}

impl RuntimeEntrypoint {
    pub fn new(payload: Payload) -> Self {
        Self { payload, target: None, trace_id: None, reply_to: None, span_id: None }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// One terminal outcome out of [`RuntimeBuilder::execute_runtime_artifacts`],
/// uniform across every execution profile.
#[derive(Clone, Debug)]
pub struct RuntimeExecutionOutcome {
    pub terminals: Vec<BoundaryTerminal>,
}

/// Top-level composition builder (spec §4.13). Accumulates discovery
/// modules, adapter factories, and lifecycle sinks, then [`build`] runs the
/// eight-step composition the spec names.
///
/// [`build`]: RuntimeBuilder::build
#[derive(Default)]
pub struct RuntimeBuilder {
    discovery_modules: DiscoveryModuleRegistry,
    adapter_factories: AdapterFactoryRegistry,
    lifecycle_sinks: Vec<Arc<dyn LifecycleSink>>,
    worker_spawner: Option<Arc<dyn WorkerProcessSpawner>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// spec §4.13 step 1: "ensure framework discovery modules are present" —
    /// callers register every module `runtime.discovery_modules` may name
    /// before calling [`build`](Self::build).
    pub fn with_discovery_module(mut self, name: impl Into<String>, callback: Arc<dyn Fn(&mut DiscoveryRegistry) + Send + Sync>) -> Self {
        self.discovery_modules.register(name, callback);
        self
    }

    pub fn with_adapter_factory(mut self, factory: Arc<dyn crate::adapter::AdapterFactory>) -> Self {
        self.adapter_factories.register(factory);
        self
    }

    pub fn with_lifecycle_sink(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.lifecycle_sinks.push(sink);
        self
    }

    /// Overrides the production [`StdWorkerProcessSpawner`] — tests install a
    /// fake spawner here to exercise `process_supervisor` mode without a
    /// real OS process.
    pub fn with_worker_process_spawner(mut self, spawner: Arc<dyn WorkerProcessSpawner>) -> Self {
        self.worker_spawner = Some(spawner);
        self
    }

    /// Runs the eight-step composition from spec §4.13 against a validated
    /// config, producing the artifacts [`execute_runtime_artifacts`] drives.
    ///
    /// [`execute_runtime_artifacts`]: Self::execute_runtime_artifacts
    pub fn build(&self, config: RuntimeConfig, scenario_id: impl Into<String>) -> Result<RuntimeBuildArtifacts, ConfigError> {
        let scenario_id = scenario_id.into();

        // Step 1: run every declared discovery module into one registry —
        // adapter registrations below land in this same registry, so
        // discovery order and adapter order both stay observable in
        // `discovery.contracts()`.
        let mut discovery = self
            .discovery_modules
            .discover(&config.runtime.discovery_modules)
            .map_err(ConfigError::UnknownDiscoveryModule)?;

        // Step 2-3: resolve each configured adapter role to its factory,
        // instantiate once, and fold its bindings into the injection
        // registry.
        let mut injection = InjectionRegistry::new();
        let mut sources: Vec<(String, Arc<dyn SourceAdapter>)> = Vec::new();

        // Deterministic order: adapters.<role> is a map, so iterate its keys
        // sorted rather than depending on HashMap iteration order.
        let mut roles: Vec<&String> = config.adapters.keys().collect();
        roles.sort();
        for role in roles {
            let adapter_config = &config.adapters[role];
            let factory = self
                .adapter_factories
                .get(role)
                .ok_or_else(|| ConfigError::UnknownAdapterRole(role.clone()))?;
            let registration = factory.build(&adapter_config.settings, &mut injection)?;
            if let Some(source) = registration.source.clone() {
                sources.push((registration.name.clone(), source));
            }
            discovery.register_adapter(registration);
        }

        // Step 4: framework defaults. Only the in-memory KV backend is
        // accepted here (spec §6 "only value accepted"); a real deployment
        // that names another backend fails fast before anything is spawned.
        match config.runtime.platform.kv.backend.as_str() {
            "memory" => {
                let _ = injection.register_kv(|| InMemoryKv, Default::default());
            }
            other => return Err(ConfigError::UnknownKvBackend(other.to_string())),
        }
        match config.runtime.platform.execution_ipc.transport.as_str() {
            "memory" | "tcp_local" => {}
            other => return Err(ConfigError::UnknownTransport(other.to_string())),
        }
        if config.runtime.platform.execution_ipc.transport == "tcp_local" {
            if let Some(bind_host) = &config.runtime.platform.execution_ipc.bind_host {
                if bind_host != "127.0.0.1" {
                    return Err(ConfigError::NonLocalBindHost);
                }
            }
            match config.runtime.platform.bootstrap.mode.as_str() {
                "inline" | "process_supervisor" => {}
                other => return Err(ConfigError::UnknownBootstrapMode(other.to_string())),
            }
        }

        // Step 5: fold adapter contracts in as external nodes and build the
        // DAG — this is where a missing provider or a cycle fails the whole
        // build before anything runs.
        let dag = build_dag(&discovery.contracts())?;
        let _execution_plan = dag.build_execution_plan()?;

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

        // Step 6: observers. `TracingObservability` is always present per
        // SPEC_FULL.md §11's ambient logging requirement; additional
        // exporters named in `runtime.observability` would be appended here
        // as their factories are discovered.
        let observability: Arc<dyn ObservabilityService> = Arc::new(FanoutObservability::new().add(Arc::new(TracingObservability)));

        // Step 7: materialize the scope, build the scenario, and attach
        // source-ingress / sink-runtime wrapper nodes for adapters whose
        // consumed or produced type has no in-graph counterpart.
        let scope = Arc::new(injection.instantiate_for_scenario());

        let router: Arc<dyn RoutingService> =
            Arc::new(Router::new(Arc::new(parking_lot::RwLock::new(consumer_registry)), config.runtime.strict));
        let context: Arc<dyn ContextService> = Arc::new(InMemoryContextService::new());
        let reply: Arc<dyn ReplyCoordinator> = Arc::new(InMemoryReplyCoordinator::new(
            Arc::new(|| std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs()),
            256,
        ));
        let work_queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());

        let mut builder = SyncRunnerBuilder::new(work_queue.clone(), router, context.clone(), observability)
            .with_reply_coordinator(reply.clone())
            .with_ordered_sink_mode(config.runtime.ordering.sink_mode.into());

        for registration in discovery.nodes() {
            builder = builder.with_node(registration.contract.name.clone(), registration.node.clone());
            if registration.service {
                builder = builder.with_full_context_node(registration.contract.name.clone());
            }
        }
        for adapter in discovery.adapters() {
            if let Some(sink) = &adapter.sink {
                builder = builder.with_node(adapter.name.clone(), Arc::new(SinkRuntimeNode { sink: sink.clone() }));
            }
        }

        let runner = Arc::new(builder.build());

        // Step 8.
        Ok(RuntimeBuildArtifacts {
            runner,
            work_queue,
            context,
            reply,
            scope,
            dag,
            config,
            scenario_id,
            sources,
        })
    }

    /// Runs `entrypoints` through `artifacts` under whichever of the three
    /// execution profiles spec §4.13 names, selected by
    /// `runtime.platform.execution_ipc.transport` and
    /// `runtime.platform.bootstrap.mode`:
    ///
    /// - `memory` — direct, single-process execution.
    /// - `tcp_local` + `inline` — the same direct execution, bracketed by
    ///   lifecycle start/ready/stop events as if one local worker had been
    ///   spawned, so observability is uniform across profiles.
    /// - `tcp_local` + `process_supervisor` — spawns one OS process per
    ///   configured group, dispatches every entrypoint across the process
    ///   boundary, and tears the groups back down. Primary worker errors take
    ///   precedence over shutdown errors when both occur (spec §4.13).
    pub fn execute_runtime_artifacts(&self, artifacts: &RuntimeBuildArtifacts, entrypoints: Vec<RuntimeEntrypoint>, run_id: &str) -> Result<RuntimeExecutionOutcome, RuntimeError> {
        let transport = artifacts.config.runtime.platform.execution_ipc.transport.as_str();
        let mode = artifacts.config.runtime.platform.bootstrap.mode.as_str();

        match (transport, mode) {
            ("memory", _) => self.run_local(artifacts, entrypoints, run_id),
            ("tcp_local", "inline") => {
                emit(&self.lifecycle_sinks, LifecycleEvent::SupervisorStartGroups { groups: vec!["inline".to_string()] });
                emit(&self.lifecycle_sinks, LifecycleEvent::WorkerSpawned { group: "inline".to_string(), worker_id: "inline#1".to_string() });
                emit(&self.lifecycle_sinks, LifecycleEvent::WorkerReady { group: "inline".to_string(), worker_id: "inline#1".to_string() });
                let outcome = self.run_local(artifacts, entrypoints, run_id);
                emit(&self.lifecycle_sinks, LifecycleEvent::WorkerStopping { group: "inline".to_string(), worker_id: "inline#1".to_string() });
                emit(&self.lifecycle_sinks, LifecycleEvent::WorkerStopped { group: "inline".to_string(), worker_id: "inline#1".to_string(), mode: "graceful" });
                outcome
            }
            ("tcp_local", "process_supervisor") => self.run_supervised(artifacts, entrypoints),
            _ => Err(RuntimeError::Config(ConfigError::UnknownBootstrapMode(mode.to_string()))),
        }
    }

    /// The `memory` and `tcp_local`+`inline` profiles share this body:
    /// register reply waiters up front, run every entrypoint to completion
    /// through `artifacts.runner`, drain every source adapter, then collect
    /// whichever traces were given a `reply_to` from the reply coordinator.
    fn run_local(&self, artifacts: &RuntimeBuildArtifacts, entrypoints: Vec<RuntimeEntrypoint>, run_id: &str) -> Result<RuntimeExecutionOutcome, RuntimeError> {
        let mut run_inputs = Vec::with_capacity(entrypoints.len());
        let mut awaited: Vec<String> = Vec::new();

        for (idx, entry) in entrypoints.into_iter().enumerate() {
            let trace_id = entry.trace_id.clone().unwrap_or_else(|| format!("{run_id}:{idx}"));
            if let Some(reply_to) = &entry.reply_to {
                artifacts
                    .reply
                    .register(&trace_id, reply_to, REPLY_TIMEOUT_SECONDS)
                    .map_err(|e| RuntimeError::Lifecycle(LifecycleError::Resolution(e.to_string())))?;
                awaited.push(trace_id.clone());
            }

            let mut envelope = Envelope::new(entry.payload).with_trace_id(trace_id);
            if let Some(target) = entry.target {
                envelope = envelope.with_target(target);
            }
            if let Some(reply_to) = entry.reply_to {
                envelope = envelope.with_reply_to(reply_to);
            }
            if let Some(span_id) = entry.span_id {
                envelope = envelope.with_span_id(span_id);
            }
            run_inputs.push(RunInput::Envelope(envelope));
        }

        artifacts.runner.run_inputs(run_inputs, run_id, &artifacts.scenario_id).map_err(RuntimeError::Runner)?;

        for (name, source) in &artifacts.sources {
            drain_source(&artifacts.runner, source.as_ref(), &format!("{run_id}:{name}"), &artifacts.scenario_id).map_err(RuntimeError::Runner)?;
        }

        let terminals = awaited
            .into_iter()
            .filter_map(|trace_id| artifacts.reply.poll(&trace_id).map(|event| BoundaryTerminal { trace_id: Some(trace_id), event }))
            .collect();

        Ok(RuntimeExecutionOutcome { terminals })
    }

    /// `tcp_local` + `process_supervisor`: spawns one OS process per
    /// configured group (spec §4.10 step 5), dispatches every entrypoint
    /// across the boundary (step 3-4), and always tears the groups back
    /// down (step 8) even when the dispatch itself failed — but a primary
    /// dispatch error is what gets returned, never a shutdown error
    /// alongside it (spec §4.13, §7.2).
    fn run_supervised(&self, artifacts: &RuntimeBuildArtifacts, entrypoints: Vec<RuntimeEntrypoint>) -> Result<RuntimeExecutionOutcome, RuntimeError> {
        let lifecycle = &artifacts.config.runtime.platform.lifecycle;
        let group_specs: Vec<ProcessGroupSpec> = artifacts
            .config
            .runtime
            .platform
            .process_groups
            .iter()
            .map(|g| ProcessGroupSpec { name: g.name.clone(), workers: g.workers, nodes: g.nodes.clone() })
            .collect();
        let group_names: Vec<String> = group_specs.iter().map(|g| g.name.clone()).collect();

        let supervisor = BootstrapSupervisor::new(self.spawner(), self.lifecycle_sinks.clone());
        supervisor.configure_process_groups(group_specs).map_err(RuntimeError::Config)?;
        supervisor.configure_routing_cache(RouteCacheSettings {
            enabled: artifacts.config.runtime.platform.routing_cache.enabled,
            negative_cache: artifacts.config.runtime.platform.routing_cache.negative_cache,
            max_entries: artifacts.config.runtime.platform.routing_cache.max_entries,
        });
        supervisor.load_child_bootstrap_bundle(self.child_bundle(artifacts));

        supervisor.start_groups(&group_names).map_err(RuntimeError::Lifecycle)?;
        if !supervisor.wait_ready(lifecycle.ready_timeout_seconds) {
            return Err(RuntimeError::Lifecycle(LifecycleError::Ready { group: group_names.join(",") }));
        }

        let dispatch_result = self.dispatch_boundary_inputs(&supervisor, entrypoints);
        let stop_result = supervisor.stop_groups(Duration::from_secs(lifecycle.graceful_timeout_seconds));

        match dispatch_result {
            Ok(terminals) => {
                stop_result.map_err(RuntimeError::Lifecycle)?;
                Ok(RuntimeExecutionOutcome { terminals })
            }
            Err(err) => Err(err),
        }
    }

    fn dispatch_boundary_inputs(&self, supervisor: &BootstrapSupervisor, entrypoints: Vec<RuntimeEntrypoint>) -> Result<Vec<BoundaryTerminal>, RuntimeError> {
        let mut inputs = Vec::with_capacity(entrypoints.len());
        for entry in entrypoints {
            let target = entry
                .target
                .clone()
                .ok_or_else(|| RuntimeError::Lifecycle(LifecycleError::Resolution("entrypoint has no explicit target for process_supervisor dispatch".to_string())))?;
            let dispatch_group = supervisor
                .resolve_group(&target)
                .ok_or_else(|| RuntimeError::Lifecycle(LifecycleError::Resolution(format!("no process group owns target '{target}'"))))?;
            let bytes = entry
                .payload
                .downcast_ref::<Vec<u8>>()
                .ok_or_else(|| RuntimeError::Boundary(BoundaryError::Execution("payload is not byte-serializable for process boundary dispatch".to_string())))?;

            inputs.push(BoundaryDispatchInput {
                payload_b64: BASE64.encode(bytes),
                dispatch_group,
                target: Some(target),
                trace_id: entry.trace_id,
                reply_to: entry.reply_to,
                source_group: None,
                route_hop: 0,
                span_id: entry.span_id,
            });
        }

        supervisor
            .execute_boundary(inputs, Duration::from_secs(BOUNDARY_TIMEOUT_SECONDS))
            .map_err(RuntimeError::Boundary)
    }

    /// Serializes the pieces a worker process needs to rebuild this same
    /// graph, for the `process_supervisor` profile's `start_groups` step
    /// (spec §4.10 step 5, §3 "ChildBootstrapBundle"). `RuntimeConfig` and
    /// its adapter settings are plain, already-validated data, so
    /// serializing them back to JSON cannot fail in practice.
    fn child_bundle(&self, artifacts: &RuntimeBuildArtifacts) -> ChildBootstrapBundle {
        let runtime_config = serde_json::to_value(&artifacts.config).expect("RuntimeConfig always serializes");
        let adapters = serde_json::to_value(&artifacts.config.adapters).expect("adapter config always serializes");
        let created_at_epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();
        ChildBootstrapBundle {
            scenario_id: artifacts.scenario_id.clone(),
            process_group: "<template>".to_string(),
            discovery_modules: artifacts.config.runtime.discovery_modules.clone(),
            runtime_config,
            adapters,
            key_bundle: flowmesh_transport_tcp::keybundle::BootstrapKeyBundle::generate(created_at_epoch),
        }
    }

    fn spawner(&self) -> Arc<dyn WorkerProcessSpawner> {
        self.worker_spawner.clone().unwrap_or_else(|| {
            Arc::new(StdWorkerProcessSpawner {
                program: std::env::current_exe().map(|p| p.display().to_string()).unwrap_or_else(|_| "flowmesh-worker".to_string()),
                args: Vec::new(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use flowmesh_core::context::Metadata;
    use flowmesh_core::runner::Node as NodeTrait;

    /// Emits `X` to B and C (spec §8 scenario 1 "single-process fan-out").
    struct EmitX;
    impl NodeTrait for EmitX {
        fn invoke(&self, _payload: Payload, _ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(vec![NodeOutput::Payload(Arc::new(7u32) as Payload)])
        }
    }

    /// Counts invocations and terminates the trace. Context isolation (spec
    /// §8) means a non-service node never sees `__trace_id`, so this
    /// records invocation *count* rather than trying to read it back.
    struct RecordAndTerminate {
        seen: Arc<AtomicUsize>,
    }
    impl NodeTrait for RecordAndTerminate {
        fn invoke(&self, _payload: Payload, _ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec![NodeOutput::Terminal(TerminalEvent::success(None))])
        }
    }

    fn minimal_config(raw: &str) -> RuntimeConfig {
        RuntimeConfig::from_toml_str(raw).expect("valid toml")
    }

    #[test]
    fn build_rejects_unknown_adapter_role_before_anything_runs() {
        let config = minimal_config(
            "[scenario]\nname = \"demo\"\n\n[adapters.missing-role]\nsettings = {}\n",
        );
        let builder = RuntimeBuilder::new();
        let err = builder.build(config, "scenario-1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAdapterRole(role) if role == "missing-role"));
    }

    #[test]
    fn build_rejects_unknown_kv_backend() {
        let config = minimal_config(
            "[scenario]\nname = \"demo\"\n\n[runtime.platform.kv]\nbackend = \"redis\"\n",
        );
        let builder = RuntimeBuilder::new();
        let err = builder.build(config, "scenario-1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKvBackend(backend) if backend == "redis"));
    }

    #[test]
    fn build_rejects_non_local_bind_host_for_tcp_local() {
        let config = minimal_config(
            r#"
            [scenario]
            name = "demo"

            [runtime.platform.execution_ipc]
            transport = "tcp_local"
            bind_host = "0.0.0.0"
            "#,
        );
        let builder = RuntimeBuilder::new();
        let err = builder.build(config, "scenario-1").unwrap_err();
        assert!(matches!(err, ConfigError::NonLocalBindHost));
    }

    #[test]
    fn single_process_fan_out_delivers_to_every_registered_consumer_in_order() {
        let config = minimal_config(
            "[scenario]\nname = \"demo\"\n\n[runtime]\ndiscovery_modules = [\"demo\"]\n",
        );

        let seen_b = Arc::new(AtomicUsize::new(0));
        let seen_c = Arc::new(AtomicUsize::new(0));
        let seen_b_for_module = seen_b.clone();
        let seen_c_for_module = seen_c.clone();

        let builder = RuntimeBuilder::new().with_discovery_module(
            "demo",
            Arc::new(move |registry: &mut DiscoveryRegistry| {
                registry.register_node(crate::discovery::NodeRegistration {
                    contract: flowmesh_core::contract::NodeContract::node("A", vec![], flowmesh_core::types![u32]),
                    node: Arc::new(EmitX),
                    service: false,
                });
                registry.register_node(crate::discovery::NodeRegistration {
                    contract: flowmesh_core::contract::NodeContract::node("B", flowmesh_core::types![u32], vec![]),
                    node: Arc::new(RecordAndTerminate { seen: seen_b_for_module.clone() }),
                    service: false,
                });
                registry.register_node(crate::discovery::NodeRegistration {
                    contract: flowmesh_core::contract::NodeContract::node("C", flowmesh_core::types![u32], vec![]),
                    node: Arc::new(RecordAndTerminate { seen: seen_c_for_module.clone() }),
                    service: false,
                });
            }),
        );

        let artifacts = builder.build(config, "scenario-1").expect("build succeeds");
        let outcome = builder
            .execute_runtime_artifacts(&artifacts, vec![RuntimeEntrypoint::new(Arc::new(0u32) as Payload).with_target("A").with_trace_id("t1")], "run-1")
            .expect("execution succeeds");

        // Both fan-out consumers were invoked exactly once (router order == registration order).
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
        assert_eq!(seen_c.load(Ordering::SeqCst), 1);
        // No reply_to was supplied, so no terminal is collected into the outcome.
        assert!(outcome.terminals.is_empty());
    }

    #[test]
    fn entrypoint_with_reply_to_surfaces_its_terminal_in_the_outcome() {
        let config = minimal_config(
            "[scenario]\nname = \"demo\"\n\n[runtime]\ndiscovery_modules = [\"demo\"]\n",
        );
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_for_module = seen.clone();

        let builder = RuntimeBuilder::new().with_discovery_module(
            "demo",
            Arc::new(move |registry: &mut DiscoveryRegistry| {
                registry.register_node(crate::discovery::NodeRegistration {
                    contract: flowmesh_core::contract::NodeContract::node("sink:only", flowmesh_core::types![u32], vec![]),
                    node: Arc::new(RecordAndTerminate { seen: seen_for_module.clone() }),
                    service: false,
                });
            }),
        );

        let artifacts = builder.build(config, "scenario-1").expect("build succeeds");
        let outcome = builder
            .execute_runtime_artifacts(
                &artifacts,
                vec![RuntimeEntrypoint::new(Arc::new(3u32) as Payload).with_target("sink:only").with_trace_id("t2").with_reply_to("http:req-2")],
                "run-2",
            )
            .expect("execution succeeds");

        assert_eq!(outcome.terminals.len(), 1);
        assert_eq!(outcome.terminals[0].trace_id.as_deref(), Some("t2"));
    }
}
