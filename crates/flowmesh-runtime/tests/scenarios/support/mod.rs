//! Shared helpers for the process-supervisor integration scenarios (spec §8
//! scenarios 3, 5, 6). Every test here runs the real `RuntimeBuilder` /
//! `BootstrapSupervisor` / `bootstrap_child_runtime_from_bundle` path; the
//! only stand-in is the worker process itself — a [`FakeWorkerProcess`]
//! whose dispatch handler is a genuine child runtime built from its own
//! `ChildBootstrapBundle`, exactly as `execute_child_boundary_loop` expects
//! a real worker to drive it.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use flowmesh_core::context::Metadata;
use flowmesh_core::contract::Payload;
use flowmesh_core::envelope::{Envelope, NodeOutput, TerminalEvent, TerminalStatus};
use flowmesh_core::runner::Node as NodeTrait;
use flowmesh_runtime::adapter::AdapterFactoryRegistry;
use flowmesh_runtime::bundle::ChildBootstrapBundle;
use flowmesh_runtime::child::{bootstrap_child_runtime_from_bundle, execute_child_boundary_loop};
use flowmesh_runtime::config::RuntimeConfig;
use flowmesh_runtime::discovery::DiscoveryModuleRegistry;
use flowmesh_runtime::error::BoundaryError;
use flowmesh_runtime::supervisor::{BoundaryReply, BoundaryRequest, BoundaryWireTerminal, FakeWorkerProcess, FakeWorkerProcessSpawner, WorkerProcess};
use flowmesh_transport_tcp::keybundle::BootstrapKeyBundle;

/// A node that relays a single-byte counter payload to the next node by
/// explicit target, bumping the counter by one (scenario 5's four-group
/// handoff chain).
pub struct RelayNode {
    pub next: &'static str,
}

impl NodeTrait for RelayNode {
    fn invoke(&self, payload: Payload, _ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
        let current = payload.downcast_ref::<Vec<u8>>().expect("relay node only ever sees Vec<u8>")[0];
        let next_payload: Payload = Arc::new(vec![current + 1]);
        Ok(vec![NodeOutput::Envelope(Envelope::new(next_payload).with_target(self.next))])
    }
}

/// Terminal end of the chain: bumps the counter one last time and reports it
/// as the run's success payload.
pub struct TerminalRelayNode;

impl NodeTrait for TerminalRelayNode {
    fn invoke(&self, payload: Payload, _ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
        let current = payload.downcast_ref::<Vec<u8>>().expect("terminal relay node only ever sees Vec<u8>")[0];
        let result: Payload = Arc::new(vec![current + 1]);
        Ok(vec![NodeOutput::Terminal(TerminalEvent::success(Some(result)))])
    }
}

/// Echoes whatever payload it receives straight back as a successful
/// terminal (scenario 3's single-hop boundary round trip).
pub struct EchoTerminalNode;

impl NodeTrait for EchoTerminalNode {
    fn invoke(&self, payload: Payload, _ctx: &Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(vec![NodeOutput::Terminal(TerminalEvent::success(Some(payload)))])
    }
}

fn status_wire_name(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::Success => "success",
        TerminalStatus::Error => "error",
        TerminalStatus::Cancelled => "cancelled",
        TerminalStatus::Timeout => "timeout",
    }
}

/// Builds a [`FakeWorkerProcessSpawner`] whose workers are real child
/// runtimes: each spawned worker bootstraps its own `ChildRuntimeArtifacts`
/// from a group-specialized bundle (mirroring what `start_groups` hands a
/// real OS process) and answers every `dispatch_boundary` call by running
/// `execute_child_boundary_loop` against it.
///
/// `discovery_modules` must register exactly the nodes `config`'s
/// `runtime.discovery_modules` and `process_groups` name; every child
/// process discovers the same full contract set (spec §4.11), differing
/// only in which of those nodes its own group attaches to the runner.
pub fn process_supervisor_spawner(config: &RuntimeConfig, scenario_id: &str, discovery_modules: DiscoveryModuleRegistry) -> Arc<FakeWorkerProcessSpawner> {
    let template = ChildBootstrapBundle {
        scenario_id: scenario_id.to_string(),
        process_group: "<template>".to_string(),
        discovery_modules: config.runtime.discovery_modules.clone(),
        runtime_config: serde_json::to_value(config).expect("RuntimeConfig always serializes"),
        adapters: serde_json::to_value(&config.adapters).expect("adapter config always serializes"),
        key_bundle: BootstrapKeyBundle::generate(0),
    };
    let adapter_factories = AdapterFactoryRegistry::new();

    Arc::new(FakeWorkerProcessSpawner {
        factory: Box::new(move |group, worker_id| {
            let bundle = template.specialize_for_group(group);
            let artifacts = bootstrap_child_runtime_from_bundle(&bundle, &discovery_modules, &adapter_factories).expect("child bootstrap succeeds from a well-formed bundle");
            let run_id = format!("child:{worker_id}");
            let scenario_id = bundle.scenario_id.clone();

            FakeWorkerProcess::new(worker_id.to_string(), move |request: BoundaryRequest| -> Result<BoundaryReply, BoundaryError> {
                let (terminals, rehop) = execute_child_boundary_loop(&artifacts, request.inputs, &run_id, &scenario_id)
                    .map_err(|e| BoundaryError::Execution(e.to_string()))?;
                let terminal = terminals
                    .into_iter()
                    .map(|(trace_id, event)| BoundaryWireTerminal {
                        trace_id,
                        status: status_wire_name(event.status).to_string(),
                        error: event.error,
                        payload_b64: event.payload.as_ref().and_then(|p| p.downcast_ref::<Vec<u8>>()).map(|bytes| BASE64.encode(bytes)),
                    })
                    .collect();
                Ok(BoundaryReply::Result { terminal, rehop })
            }) as Arc<dyn WorkerProcess>
        }),
    })
}
