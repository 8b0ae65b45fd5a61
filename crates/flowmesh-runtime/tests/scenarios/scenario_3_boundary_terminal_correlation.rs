//! spec §8 scenario 3: a boundary dispatch's terminal output correlates back
//! to the trace_id the entrypoint carried, with its payload intact, even
//! though the whole round trip crossed the process-supervisor boundary
//! (single group, single worker).

mod support;

use std::sync::Arc;

use flowmesh_core::contract::Payload;
use flowmesh_runtime::builder::{RuntimeBuilder, RuntimeEntrypoint};
use flowmesh_runtime::config::RuntimeConfig;
use flowmesh_runtime::discovery::{DiscoveryRegistry, NodeRegistration};

fn config() -> RuntimeConfig {
    RuntimeConfig::from_toml_str(
        r#"
        [scenario]
        name = "boundary-terminal-correlation"

        [runtime]
        discovery_modules = ["main"]

        [runtime.platform.execution_ipc]
        transport = "tcp_local"
        bind_host = "127.0.0.1"

        [runtime.platform.bootstrap]
        mode = "process_supervisor"

        [[runtime.platform.process_groups]]
        name = "execution.main"
        workers = 1
        nodes = ["echo.terminal"]
        "#,
    )
    .expect("valid toml")
}

#[test]
fn boundary_terminal_preserves_trace_id_and_payload_across_the_process_boundary() {
    let config = config();

    let mut discovery_modules = flowmesh_runtime::discovery::DiscoveryModuleRegistry::new();
    discovery_modules.register(
        "main",
        Arc::new(|registry: &mut DiscoveryRegistry| {
            registry.register_node(NodeRegistration {
                // `external: true` marks this the DAG's one unbound sink — its
                // consumed type has no in-graph producer because every input
                // here arrives via explicit boundary dispatch, never routing.
                contract: flowmesh_core::contract::NodeContract {
                    name: "echo.terminal".to_string(),
                    consumes: flowmesh_core::types![Vec<u8>],
                    emits: vec![],
                    external: true,
                },
                node: Arc::new(support::EchoTerminalNode),
                service: false,
            });
        }),
    );

    let spawner = support::process_supervisor_spawner(&config, "scenario-3", discovery_modules);
    let builder = RuntimeBuilder::new().with_worker_process_spawner(spawner);
    let artifacts = builder.build(config, "scenario-3").expect("build succeeds");

    let payload: Payload = Arc::new(vec![9u8, 9, 9]);
    let outcome = builder
        .execute_runtime_artifacts(
            &artifacts,
            vec![RuntimeEntrypoint::new(payload).with_target("echo.terminal").with_trace_id("t-scenario-3")],
            "run-scenario-3",
        )
        .expect("execution succeeds");

    assert_eq!(outcome.terminals.len(), 1);
    let terminal = &outcome.terminals[0];
    assert_eq!(terminal.trace_id.as_deref(), Some("t-scenario-3"));
    assert_eq!(terminal.event.status, flowmesh_core::envelope::TerminalStatus::Success);
    let payload = terminal.event.payload.as_ref().expect("terminal carries the echoed payload");
    assert_eq!(payload.downcast_ref::<Vec<u8>>().unwrap(), &vec![9u8, 9, 9]);
}
