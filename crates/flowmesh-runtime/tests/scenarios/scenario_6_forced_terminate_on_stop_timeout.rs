//! spec §8 scenario 6: a worker that never honors `request_stop` forces
//! `stop_groups` to escalate to `force_terminate` once `graceful_timeout_seconds`
//! elapses — `kill()` is called, `worker_stopped mode="forced"` fires per
//! group, and `stop_groups` itself still returns `Ok(())` (spec §7.2,
//! §13 item 2: this path always suppresses a stop-timeout error).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flowmesh_runtime::builder::RuntimeBuilder;
use flowmesh_runtime::config::RuntimeConfig;
use flowmesh_runtime::error::BoundaryError;
use flowmesh_runtime::lifecycle::{LifecycleEvent, RecordingLifecycleSink};
use flowmesh_runtime::supervisor::{BoundaryReply, BoundaryRequest, WorkerProcess, WorkerProcessSpawner};

/// A worker that ignores `request_stop` entirely and only reports itself
/// stopped once `kill()` has actually been called — the shape needed to
/// force `stop_groups` down its forced-termination path rather than ever
/// exercising the graceful one.
struct StubbornWorkerProcess {
    worker_id: String,
    killed: AtomicBool,
}

impl WorkerProcess for StubbornWorkerProcess {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn request_stop(&self) {
        // Deliberately a no-op: this worker never cooperates with a graceful
        // shutdown request.
    }

    fn wait_stopped(&self, deadline: Instant) -> bool {
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    fn dispatch_boundary(&self, _request: BoundaryRequest, _timeout: Duration) -> Result<BoundaryReply, BoundaryError> {
        unreachable!("this scenario never dispatches a boundary batch")
    }
}

struct StubbornWorkerProcessSpawner {
    spawned: Mutex<Vec<Arc<StubbornWorkerProcess>>>,
}

impl WorkerProcessSpawner for StubbornWorkerProcessSpawner {
    fn spawn(&self, _group: &str, worker_id: &str, _bundle: &flowmesh_runtime::bundle::ChildBootstrapBundle) -> Result<Arc<dyn WorkerProcess>, flowmesh_runtime::error::LifecycleError> {
        let process = Arc::new(StubbornWorkerProcess { worker_id: worker_id.to_string(), killed: AtomicBool::new(false) });
        self.spawned.lock().unwrap().push(process.clone());
        Ok(process as Arc<dyn WorkerProcess>)
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig::from_toml_str(
        r#"
        [scenario]
        name = "forced-terminate-on-stop-timeout"

        [runtime.platform.execution_ipc]
        transport = "tcp_local"
        bind_host = "127.0.0.1"

        [runtime.platform.bootstrap]
        mode = "process_supervisor"

        [runtime.platform.lifecycle]
        graceful_timeout_seconds = 1

        [[runtime.platform.process_groups]]
        name = "execution.a"
        workers = 1
        nodes = []

        [[runtime.platform.process_groups]]
        name = "execution.b"
        workers = 1
        nodes = []
        "#,
    )
    .expect("valid toml")
}

#[test]
fn unresponsive_workers_are_force_killed_and_stop_groups_still_succeeds() {
    let config = config();
    let spawner = Arc::new(StubbornWorkerProcessSpawner { spawned: Mutex::new(Vec::new()) });
    let sink = Arc::new(RecordingLifecycleSink::new());

    let builder = RuntimeBuilder::new().with_worker_process_spawner(spawner.clone()).with_lifecycle_sink(sink.clone());
    let artifacts = builder.build(config, "scenario-6").expect("build succeeds with no discovery modules or adapters");

    let outcome = builder
        .execute_runtime_artifacts(&artifacts, vec![], "run-scenario-6")
        .expect("stop_groups suppresses the timeout once force_terminate runs");
    assert!(outcome.terminals.is_empty());

    let spawned = spawner.spawned.lock().unwrap();
    assert_eq!(spawned.len(), 2);
    assert!(spawned.iter().all(|p| p.killed.load(Ordering::SeqCst)), "every unresponsive worker must be force-killed");

    let forced_stops: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::WorkerStopped { group, mode, .. } if mode == "forced" => Some(group),
            _ => None,
        })
        .collect();
    assert_eq!(forced_stops.len(), 2);
    assert!(forced_stops.contains(&"execution.a".to_string()));
    assert!(forced_stops.contains(&"execution.b".to_string()));

    let graceful_stops = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, LifecycleEvent::WorkerStopped { mode, .. } if *mode == "graceful"))
        .count();
    assert_eq!(graceful_stops, 0);
}
