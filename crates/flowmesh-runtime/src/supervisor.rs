//! `BootstrapSupervisor` (spec §4.10): splits the graph across OS
//! processes grouped by placement, dispatches boundary batches, and
//! gates worker lifecycle.
//!
//! Process spawning is behind the [`WorkerProcess`]/[`WorkerProcessSpawner`]
//! traits, the same "trait boundary + in-memory default, swappable
//! production impl" shape every collaborator in `flowmesh-core` uses
//! (`WorkQueue`, `ContextService`, `RoutingService`, ...). [`StdWorkerProcessSpawner`]
//! is the production implementation, spawning a real OS process per
//! worker and speaking a newline-delimited JSON control protocol over its
//! stdin/stdout — the Rust analogue of the source's per-child duplex pipe
//! (spec §9 "Multi-process boundary": "exchange only: (a) the control
//! pipe, (b) the stop event, (c) the metadata bundle").

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bundle::{BoundaryDispatchInput, ChildBootstrapBundle};
use crate::error::{BoundaryError, LifecycleError};
use crate::lifecycle::{emit, LifecycleEvent, LifecycleSink};
use crate::routecache::{RouteCache, RouteCacheSettings};

/// `{ name, workers, nodes }` from spec §4.10 step 1.
#[derive(Clone, Debug)]
pub struct ProcessGroupSpec {
    pub name: String,
    pub workers: usize,
    pub nodes: Vec<String>,
}

/// One terminal output crossing back from a boundary dispatch, paired with
/// the trace_id it correlates to (spec §4.10 "execute_boundary_result
/// { terminal_outputs: [Envelope] }" — a plain tuple here since this
/// boundary-only result has no local/boundary-delivery channels to carry,
/// unlike `flowmesh_core::router::RoutingResult`).
#[derive(Clone, Debug)]
pub struct BoundaryTerminal {
    pub trace_id: Option<String>,
    pub event: flowmesh_core::envelope::TerminalEvent,
}

/// Wire shape for one round of `execute_boundary` (spec §4.10 steps 3-4).
#[derive(Serialize, Deserialize)]
pub struct BoundaryRequest {
    pub inputs: Vec<BoundaryDispatchInput>,
}

#[derive(Serialize, Deserialize)]
pub enum BoundaryReply {
    Result { terminal: Vec<BoundaryWireTerminal>, rehop: Vec<BoundaryDispatchInput> },
    Error { category: String, message: String },
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BoundaryWireTerminal {
    pub trace_id: Option<String>,
    pub status: String,
    pub error: Option<String>,
    /// Base64 of the terminal's payload, when it has one and that payload
    /// is byte-serializable — the same "boundary payloads are bytes"
    /// constraint `BoundaryDispatchInput.payload_b64` carries.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload_b64: Option<String>,
}

/// A spawned worker process, abstracted behind the control-pipe round
/// trip the supervisor needs. Implementations own whatever OS resource
/// backs the process (a real child, or an in-memory stand-in for tests).
pub trait WorkerProcess: Send + Sync {
    fn worker_id(&self) -> &str;
    fn is_alive(&self) -> bool;
    fn request_stop(&self);
    /// Blocks until the worker has exited or `deadline` passes, returning
    /// whether it exited in time.
    fn wait_stopped(&self, deadline: Instant) -> bool;
    fn kill(&self);
    /// Round-trips one boundary dispatch batch over the control channel
    /// (spec §4.10 steps 3-4). `timeout` bounds the wait.
    fn dispatch_boundary(&self, request: BoundaryRequest, timeout: Duration) -> Result<BoundaryReply, BoundaryError>;
}

pub trait WorkerProcessSpawner: Send + Sync {
    fn spawn(&self, group: &str, worker_id: &str, bundle: &ChildBootstrapBundle) -> Result<Arc<dyn WorkerProcess>, LifecycleError>;
}

/// Production spawner: one real OS process per worker, given the
/// worker id and the group-specialized bundle (as JSON on stdin) on the
/// command line / environment, matching spec §4.10 step 5's "worker id
/// `{group}#{idx+1}`, and lifecycle logging settings".
pub struct StdWorkerProcessSpawner {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerProcessSpawner for StdWorkerProcessSpawner {
    fn spawn(&self, group: &str, worker_id: &str, bundle: &ChildBootstrapBundle) -> Result<Arc<dyn WorkerProcess>, LifecycleError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("FLOWMESH_WORKER_ID", worker_id)
            .env("FLOWMESH_PROCESS_GROUP", group)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = command.spawn().map_err(|_| LifecycleError::BootstrapStart(group.to_string()))?;

        let bundle_json =
            serde_json::to_string(bundle).map_err(|_| LifecycleError::BootstrapStart(group.to_string()))?;
        if let Some(stdin) = child.stdin.as_mut() {
            writeln!(stdin, "{bundle_json}").map_err(|_| LifecycleError::BootstrapStart(group.to_string()))?;
        }

        Ok(Arc::new(StdWorkerProcess {
            worker_id: worker_id.to_string(),
            child: Mutex::new(child),
        }))
    }
}

struct StdWorkerProcess {
    worker_id: String,
    child: Mutex<Child>,
}

impl WorkerProcess for StdWorkerProcess {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    fn request_stop(&self) {
        if let Some(stdin) = self.child.lock().stdin.as_mut() {
            let _ = writeln!(stdin, "{{\"kind\":\"control.stop\"}}");
        }
    }

    fn wait_stopped(&self, deadline: Instant) -> bool {
        loop {
            if matches!(self.child.lock().try_wait(), Ok(Some(_))) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn kill(&self) {
        let _ = self.child.lock().kill();
    }

    fn dispatch_boundary(&self, request: BoundaryRequest, timeout: Duration) -> Result<BoundaryReply, BoundaryError> {
        let mut guard = self.child.lock();
        let request_json =
            serde_json::to_string(&request).map_err(|_| BoundaryError::Execution(self.worker_id.clone()))?;
        let stdin = guard.stdin.as_mut().ok_or_else(|| BoundaryError::Transport(self.worker_id.clone()))?;
        writeln!(stdin, "{request_json}").map_err(|_| BoundaryError::Transport(self.worker_id.clone()))?;

        let deadline = Instant::now() + timeout;
        let stdout = guard.stdout.as_mut().ok_or_else(|| BoundaryError::Transport(self.worker_id.clone()))?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        // A real implementation would poll with a select-style timeout;
        // blocking `read_line` here is bounded by the caller only
        // checking `Instant::now()` after the call, matching the
        // coarse-grained boundary_timeout_seconds the spec describes.
        reader.read_line(&mut line).map_err(|_| BoundaryError::Transport(self.worker_id.clone()))?;
        if Instant::now() > deadline {
            return Err(BoundaryError::Timeout(self.worker_id.clone()));
        }
        serde_json::from_str(&line).map_err(|_| BoundaryError::Execution(self.worker_id.clone()))
    }
}

struct WorkerSlot {
    process: Arc<dyn WorkerProcess>,
    group: String,
}

/// Parent-side supervisor state (spec §4.10). `Mutex`-guarded per spec §5
/// "the supervisor itself uses a lock around its worker table, route
/// cache, and lifecycle event buffer".
pub struct BootstrapSupervisor {
    spawner: Arc<dyn WorkerProcessSpawner>,
    sinks: Vec<Arc<dyn LifecycleSink>>,
    groups: Mutex<HashMap<String, ProcessGroupSpec>>,
    workers: Mutex<HashMap<String, WorkerSlot>>,
    group_rr_cursor: Mutex<HashMap<String, usize>>,
    route_cache: Mutex<RouteCache>,
    bundle_template: Mutex<Option<ChildBootstrapBundle>>,
    ready_warmup: Duration,
}

impl BootstrapSupervisor {
    pub fn new(spawner: Arc<dyn WorkerProcessSpawner>, sinks: Vec<Arc<dyn LifecycleSink>>) -> Self {
        Self {
            spawner,
            sinks,
            groups: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            group_rr_cursor: Mutex::new(HashMap::new()),
            route_cache: Mutex::new(RouteCache::new(RouteCacheSettings::default())),
            bundle_template: Mutex::new(None),
            ready_warmup: Duration::from_millis(50),
        }
    }

    /// spec §4.10 step 1: duplicate placement across groups is rejected.
    pub fn configure_process_groups(&self, specs: Vec<ProcessGroupSpec>) -> Result<(), crate::error::ConfigError> {
        let mut seen: HashMap<String, String> = HashMap::new();
        for spec in &specs {
            for node in &spec.nodes {
                if let Some(existing_group) = seen.insert(node.clone(), spec.name.clone()) {
                    if existing_group != spec.name {
                        return Err(crate::error::ConfigError::DuplicatePlacement(node.clone()));
                    }
                }
            }
        }
        let mut groups = self.groups.lock();
        groups.clear();
        for spec in specs {
            groups.insert(spec.name.clone(), spec);
        }
        self.route_cache.lock().invalidate();
        emit(&self.sinks, LifecycleEvent::RouteCacheInvalidated { generation: self.route_cache.lock().diagnostics().generation });
        Ok(())
    }

    /// spec §4.10 step 2. Per SPEC_FULL.md §13 item 1, this does *not* emit
    /// `route_cache_invalidated` — only a placement change does.
    pub fn configure_routing_cache(&self, settings: RouteCacheSettings) {
        self.route_cache.lock().configure(settings);
        emit(
            &self.sinks,
            LifecycleEvent::RouteCacheConfigured { max_entries: settings.max_entries, negative_cache: settings.negative_cache },
        );
    }

    pub fn load_child_bootstrap_bundle(&self, bundle: ChildBootstrapBundle) {
        *self.bundle_template.lock() = Some(bundle);
    }

    /// Resolves `target` to its process group, consulting (and populating)
    /// the route cache (spec §4.10 "Target → group resolution").
    pub fn resolve_group(&self, target: &str) -> Option<String> {
        if let Some(cached) = self.route_cache.lock().lookup(target) {
            return cached.map(str::to_string);
        }
        let groups = self.groups.lock();
        let found = groups.values().find(|g| g.nodes.iter().any(|n| n == target)).map(|g| g.name.clone());
        let mut cache = self.route_cache.lock();
        match &found {
            Some(group) => cache.record_hit(target, group),
            None => cache.record_miss(target),
        }
        found
    }

    /// spec §4.10 step 5: spawns `workers` OS processes per named group, in
    /// declared order, emitting `worker_spawned` per child.
    pub fn start_groups(&self, group_names: &[String]) -> Result<(), LifecycleError> {
        emit(&self.sinks, LifecycleEvent::SupervisorStartGroups { groups: group_names.to_vec() });
        let bundle_template = self
            .bundle_template
            .lock()
            .clone()
            .ok_or_else(|| LifecycleError::BootstrapResolution("no child bootstrap bundle loaded".to_string()))?;

        let groups = self.groups.lock();
        for group_name in group_names {
            let spec = groups.get(group_name).ok_or_else(|| LifecycleError::BootstrapStart(group_name.clone()))?;
            let bundle = bundle_template.specialize_for_group(group_name);
            for idx in 0..spec.workers {
                let worker_id = format!("{group_name}#{}", idx + 1);
                let process = self.spawner.spawn(group_name, &worker_id, &bundle)?;
                self.workers.lock().insert(worker_id.clone(), WorkerSlot { process, group: group_name.clone() });
                emit(&self.sinks, LifecycleEvent::WorkerSpawned { group: group_name.clone(), worker_id });
            }
        }
        Ok(())
    }

    /// spec §4.10 step 6: ready when all children are alive *and* a
    /// minimum warmup delay has elapsed; `wait_ready(0)` must never
    /// return true (spec §8 "Boundary behaviors").
    pub fn wait_ready(&self, timeout_seconds: u64) -> bool {
        if timeout_seconds == 0 {
            return false;
        }
        let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
        std::thread::sleep(self.ready_warmup);

        let workers = self.workers.lock();
        for (worker_id, slot) in workers.iter() {
            if !slot.process.is_alive() {
                emit(&self.sinks, LifecycleEvent::WorkerFailed { group: slot.group.clone(), worker_id: worker_id.clone(), reason: "process exited before ready".to_string() });
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        for (worker_id, slot) in workers.iter() {
            emit(&self.sinks, LifecycleEvent::WorkerReady { group: slot.group.clone(), worker_id: worker_id.clone() });
        }
        true
    }

    fn pick_worker_round_robin(&self, group: &str) -> Option<Arc<dyn WorkerProcess>> {
        let workers = self.workers.lock();
        let mut candidates: Vec<&WorkerSlot> = workers.values().filter(|slot| slot.group == group && slot.process.is_alive()).collect();
        candidates.sort_by(|a, b| a.process.worker_id().cmp(b.process.worker_id()));
        if candidates.is_empty() {
            return None;
        }
        let mut cursor = self.group_rr_cursor.lock();
        let index = cursor.entry(group.to_string()).or_insert(0);
        let chosen = candidates[*index % candidates.len()].process.clone();
        *index += 1;
        Some(chosen)
    }

    /// `execute_boundary` (spec §4.10): groups pending inputs by
    /// `dispatch_group`, round-robins a worker per group, and loops until
    /// every input resolves to a terminal output or the recursion cap
    /// fires.
    pub fn execute_boundary(&self, inputs: Vec<BoundaryDispatchInput>, boundary_timeout: Duration) -> Result<Vec<BoundaryTerminal>, BoundaryError> {
        const MAX_HOPS: u32 = 16;
        let mut pending = inputs;
        let mut terminals = Vec::new();

        while !pending.is_empty() {
            let mut by_group: HashMap<String, Vec<BoundaryDispatchInput>> = HashMap::new();
            for input in pending.drain(..) {
                by_group.entry(input.dispatch_group.clone()).or_default().push(input);
            }

            let mut next_round = Vec::new();
            for (group, batch) in by_group {
                emit(&self.sinks, LifecycleEvent::BoundaryDispatchStarted { group: group.clone(), trace_id: batch.first().and_then(|i| i.trace_id.clone()) });
                let worker = self.pick_worker_round_robin(&group).ok_or_else(|| BoundaryError::Transport(group.clone()))?;
                let reply = worker.dispatch_boundary(BoundaryRequest { inputs: batch }, boundary_timeout)?;
                match reply {
                    BoundaryReply::Result { terminal, rehop } => {
                        for wire in terminal {
                            let status = match wire.status.as_str() {
                                "success" => flowmesh_core::envelope::TerminalStatus::Success,
                                "cancelled" => flowmesh_core::envelope::TerminalStatus::Cancelled,
                                "timeout" => flowmesh_core::envelope::TerminalStatus::Timeout,
                                _ => flowmesh_core::envelope::TerminalStatus::Error,
                            };
                            let payload = wire.payload_b64.as_deref().and_then(|b64| {
                                base64::engine::general_purpose::STANDARD.decode(b64).ok().map(|bytes| Arc::new(bytes) as flowmesh_core::contract::Payload)
                            });
                            terminals.push(BoundaryTerminal {
                                trace_id: wire.trace_id,
                                event: flowmesh_core::envelope::TerminalEvent { status, payload, error: wire.error },
                            });
                        }
                        for input in rehop {
                            if input.route_hop >= MAX_HOPS {
                                return Err(BoundaryError::Execution(group.clone()));
                            }
                            next_round.push(input.rehop(&group));
                        }
                    }
                    BoundaryReply::Error { category, message: _ } => {
                        return Err(match category.as_str() {
                            "timeout" => BoundaryError::Timeout(group),
                            "transport" => BoundaryError::Transport(group),
                            _ => BoundaryError::Execution(group),
                        });
                    }
                }
                emit(&self.sinks, LifecycleEvent::BoundaryDispatchCompleted { group: group.clone(), trace_id: None });
            }
            pending = next_round;
        }
        Ok(terminals)
    }

    /// spec §4.10 step 8: signal stop, join with deadline, escalate to
    /// forced termination on timeout. Always emits exactly one
    /// `worker_stopped` per worker (spec §4.10 step 9).
    pub fn stop_groups(&self, graceful_timeout: Duration) -> Result<(), LifecycleError> {
        let workers = self.workers.lock();
        for (worker_id, slot) in workers.iter() {
            emit(&self.sinks, LifecycleEvent::WorkerStopping { group: slot.group.clone(), worker_id: worker_id.clone() });
            slot.process.request_stop();
        }

        let deadline = Instant::now() + graceful_timeout;
        let mut timed_out_groups = Vec::new();
        for (worker_id, slot) in workers.iter() {
            if slot.process.wait_stopped(deadline) {
                emit(&self.sinks, LifecycleEvent::WorkerStopped { group: slot.group.clone(), worker_id: worker_id.clone(), mode: "graceful" });
            } else {
                timed_out_groups.push((worker_id.clone(), slot));
            }
        }

        if !timed_out_groups.is_empty() {
            let handles: Vec<(String, &WorkerSlot)> = timed_out_groups;
            self.force_terminate(&handles);
            return Ok(());
        }
        Ok(())
    }

    /// `force_terminate_groups`: kills unresponsive processes and emits
    /// `worker_stopped mode="forced"` (spec §4.10 step 8, §13 item 2 —
    /// always suppresses `RuntimeBootstrapStopTimeoutError` since this
    /// path runs to completion whenever it is invoked at all).
    fn force_terminate(&self, handles: &[(String, &WorkerSlot)]) {
        for (worker_id, slot) in handles {
            slot.process.kill();
            emit(&self.sinks, LifecycleEvent::WorkerStopped { group: slot.group.clone(), worker_id: worker_id.clone(), mode: "forced" });
        }
    }

    pub fn route_cache_diagnostics(&self) -> crate::routecache::RouteCacheDiagnostics {
        self.route_cache.lock().diagnostics()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

/// Deterministic in-memory [`WorkerProcess`] for tests: no real OS process,
/// `dispatch_boundary` is driven by a caller-supplied closure so supervisor
/// tests can exercise the dispatch loop end-to-end without spawning
/// anything.
pub struct FakeWorkerProcess {
    worker_id: String,
    alive: AtomicBool,
    #[allow(clippy::type_complexity)]
    handler: Box<dyn Fn(BoundaryRequest) -> Result<BoundaryReply, BoundaryError> + Send + Sync>,
    dispatch_count: AtomicUsize,
}

impl FakeWorkerProcess {
    pub fn new(worker_id: impl Into<String>, handler: impl Fn(BoundaryRequest) -> Result<BoundaryReply, BoundaryError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            worker_id: worker_id.into(),
            alive: AtomicBool::new(true),
            handler: Box::new(handler),
            dispatch_count: AtomicUsize::new(0),
        })
    }

    pub fn kill_it(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count.load(Ordering::SeqCst)
    }
}

impl WorkerProcess for FakeWorkerProcess {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn wait_stopped(&self, _deadline: Instant) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn dispatch_boundary(&self, request: BoundaryRequest, _timeout: Duration) -> Result<BoundaryReply, BoundaryError> {
        self.dispatch_count.fetch_add(1, Ordering::SeqCst);
        (self.handler)(request)
    }
}

pub struct FakeWorkerProcessSpawner {
    #[allow(clippy::type_complexity)]
    pub factory: Box<dyn Fn(&str, &str) -> Arc<dyn WorkerProcess> + Send + Sync>,
}

impl WorkerProcessSpawner for FakeWorkerProcessSpawner {
    fn spawn(&self, group: &str, worker_id: &str, _bundle: &ChildBootstrapBundle) -> Result<Arc<dyn WorkerProcess>, LifecycleError> {
        Ok((self.factory)(group, worker_id))
    }
}
