//! spec §8 scenario 5: a payload crosses four process groups in a chain
//! (ingress -> features -> policy -> egress), each hop a real boundary
//! dispatch/rehop round trip, and the final terminal carries the
//! accumulated result. Also asserts `worker_spawned`/`worker_ready`/
//! `worker_stopped` each fire exactly once per group, in declared order.

mod support;

use std::sync::Arc;

use flowmesh_core::contract::Payload;
use flowmesh_runtime::builder::{RuntimeBuilder, RuntimeEntrypoint};
use flowmesh_runtime::config::RuntimeConfig;
use flowmesh_runtime::discovery::{DiscoveryRegistry, NodeRegistration};
use flowmesh_runtime::lifecycle::{LifecycleEvent, RecordingLifecycleSink};

fn config() -> RuntimeConfig {
    RuntimeConfig::from_toml_str(
        r#"
        [scenario]
        name = "four-group-handoff"

        [runtime]
        discovery_modules = ["main"]

        [runtime.platform.execution_ipc]
        transport = "tcp_local"
        bind_host = "127.0.0.1"

        [runtime.platform.bootstrap]
        mode = "process_supervisor"

        [[runtime.platform.process_groups]]
        name = "execution.ingress"
        workers = 1
        nodes = ["ingress.n1"]

        [[runtime.platform.process_groups]]
        name = "execution.features"
        workers = 1
        nodes = ["features.n2"]

        [[runtime.platform.process_groups]]
        name = "execution.policy"
        workers = 1
        nodes = ["policy.n3"]

        [[runtime.platform.process_groups]]
        name = "execution.egress"
        workers = 1
        nodes = ["egress.n4"]
        "#,
    )
    .expect("valid toml")
}

fn register_chain(registry: &mut DiscoveryRegistry) {
    // `ingress.n1` is the chain's sole declared producer of `Vec<u8>` — the
    // only thing `build_dag`'s missing-provider check needs. The three
    // downstream nodes declare no `emits` even though they each construct an
    // explicit-target envelope at runtime: routing only ever consults
    // declared `consumes` (spec §4.3), never `emits`.
    registry.register_node(NodeRegistration {
        contract: flowmesh_core::contract::NodeContract::node("ingress.n1", vec![], flowmesh_core::types![Vec<u8>]),
        node: Arc::new(support::RelayNode { next: "features.n2" }),
        service: false,
    });
    registry.register_node(NodeRegistration {
        contract: flowmesh_core::contract::NodeContract::node("features.n2", flowmesh_core::types![Vec<u8>], vec![]),
        node: Arc::new(support::RelayNode { next: "policy.n3" }),
        service: false,
    });
    registry.register_node(NodeRegistration {
        contract: flowmesh_core::contract::NodeContract::node("policy.n3", flowmesh_core::types![Vec<u8>], vec![]),
        node: Arc::new(support::RelayNode { next: "egress.n4" }),
        service: false,
    });
    registry.register_node(NodeRegistration {
        contract: flowmesh_core::contract::NodeContract::node("egress.n4", flowmesh_core::types![Vec<u8>], vec![]),
        node: Arc::new(support::TerminalRelayNode),
        service: false,
    });
}

#[test]
fn payload_crosses_all_four_groups_and_the_terminal_carries_the_accumulated_result() {
    let config = config();

    let mut discovery_modules = flowmesh_runtime::discovery::DiscoveryModuleRegistry::new();
    discovery_modules.register("main", Arc::new(register_chain));

    let sink = Arc::new(RecordingLifecycleSink::new());
    let spawner = support::process_supervisor_spawner(&config, "scenario-5", discovery_modules);
    let builder = RuntimeBuilder::new().with_worker_process_spawner(spawner).with_lifecycle_sink(sink.clone());
    let artifacts = builder.build(config, "scenario-5").expect("build succeeds");

    let payload: Payload = Arc::new(vec![1u8]);
    let outcome = builder
        .execute_runtime_artifacts(
            &artifacts,
            vec![RuntimeEntrypoint::new(payload).with_target("ingress.n1").with_trace_id("t-scenario-5")],
            "run-scenario-5",
        )
        .expect("execution succeeds");

    assert_eq!(outcome.terminals.len(), 1);
    let terminal = &outcome.terminals[0];
    assert_eq!(terminal.trace_id.as_deref(), Some("t-scenario-5"));
    assert_eq!(terminal.event.status, flowmesh_core::envelope::TerminalStatus::Success);
    let payload = terminal.event.payload.as_ref().expect("terminal carries the chained result");
    assert_eq!(payload.downcast_ref::<Vec<u8>>().unwrap(), &vec![5u8]);

    let expected_groups = ["execution.ingress", "execution.features", "execution.policy", "execution.egress"];

    let spawned: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::WorkerSpawned { group, .. } => Some(group),
            _ => None,
        })
        .collect();
    assert_eq!(spawned, expected_groups.to_vec());

    // `wait_ready` iterates the worker table by its own internal order (not
    // declared group order), so only the *set* of groups reported ready is
    // asserted here.
    let mut ready: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::WorkerReady { group, .. } => Some(group),
            _ => None,
        })
        .collect();
    ready.sort();
    let mut expected_sorted = expected_groups.to_vec();
    expected_sorted.sort();
    assert_eq!(ready, expected_sorted);

    let stopped: Vec<(String, &'static str)> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::WorkerStopped { group, mode, .. } => Some((group, mode)),
            _ => None,
        })
        .collect();
    assert_eq!(stopped.len(), 4);
    assert!(stopped.iter().all(|(_, mode)| *mode == "graceful"));
}
