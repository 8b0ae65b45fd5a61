//! Structural lifecycle log events (spec §6 "Lifecycle log events").
//!
//! Each event carries a monotonic millisecond timestamp and the fields
//! spec §6 names. Per SPEC_FULL.md §11 these are emitted both through
//! [`LifecycleSink`] (for tests and structured consumers) and as `tracing`
//! events at `info`/`warn`, so operators get them in plain log output even
//! without a configured exporter.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug)]
pub enum LifecycleEvent {
    WorkerSpawned { group: String, worker_id: String },
    WorkerReady { group: String, worker_id: String },
    WorkerFailed { group: String, worker_id: String, reason: String },
    WorkerStopping { group: String, worker_id: String },
    WorkerStopped { group: String, worker_id: String, mode: &'static str },
    SupervisorStartGroups { groups: Vec<String> },
    BoundaryDispatchStarted { group: String, trace_id: Option<String> },
    BoundaryDispatchCompleted { group: String, trace_id: Option<String> },
    RouteCacheConfigured { max_entries: usize, negative_cache: bool },
    RouteCacheInvalidated { generation: u64 },
    StopEventUnavailable { group: String },
    ControlChannelUnavailable { group: String, worker_id: String },
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::WorkerSpawned { .. } => "worker_spawned",
            LifecycleEvent::WorkerReady { .. } => "worker_ready",
            LifecycleEvent::WorkerFailed { .. } => "worker_failed",
            LifecycleEvent::WorkerStopping { .. } => "worker_stopping",
            LifecycleEvent::WorkerStopped { .. } => "worker_stopped",
            LifecycleEvent::SupervisorStartGroups { .. } => "supervisor_start_groups",
            LifecycleEvent::BoundaryDispatchStarted { .. } => "boundary_dispatch_started",
            LifecycleEvent::BoundaryDispatchCompleted { .. } => "boundary_dispatch_completed",
            LifecycleEvent::RouteCacheConfigured { .. } => "route_cache_configured",
            LifecycleEvent::RouteCacheInvalidated { .. } => "route_cache_invalidated",
            LifecycleEvent::StopEventUnavailable { .. } => "stop_event_unavailable",
            LifecycleEvent::ControlChannelUnavailable { .. } => "control_channel_unavailable",
        }
    }
}

/// Monotonic millisecond clock for lifecycle event timestamps, independent
/// of wall-clock adjustments. A single process-wide counter is enough here
/// since only relative ordering is ever observed.
fn monotonic_ms() -> u64 {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Receives every [`LifecycleEvent`] the supervisor emits, in order. The
/// production path also logs via `tracing`; this trait exists so tests can
/// assert on the exact sequence (spec §8 scenario 5's "four `worker_spawned`
/// in declared group order").
pub trait LifecycleSink: Send + Sync {
    fn record(&self, event: LifecycleEvent, ts_ms: u64, seq: u64);
}

pub struct TracingLifecycleSink;

impl LifecycleSink for TracingLifecycleSink {
    fn record(&self, event: LifecycleEvent, ts_ms: u64, _seq: u64) {
        let name = event.name();
        match &event {
            LifecycleEvent::WorkerFailed { group, worker_id, reason } => {
                tracing::warn!(event = name, ts_ms, group, worker_id, reason, "lifecycle event")
            }
            LifecycleEvent::StopEventUnavailable { group } | LifecycleEvent::ControlChannelUnavailable { group, .. } => {
                tracing::warn!(event = name, ts_ms, group, "lifecycle event")
            }
            _ => tracing::info!(event = name, ts_ms, "lifecycle event"),
        }
    }
}

#[derive(Default)]
pub struct RecordingLifecycleSink {
    events: parking_lot::Mutex<Vec<LifecycleEvent>>,
}

impl RecordingLifecycleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }
}

impl LifecycleSink for RecordingLifecycleSink {
    fn record(&self, event: LifecycleEvent, _ts_ms: u64, _seq: u64) {
        self.events.lock().push(event);
    }
}

/// Emits a [`LifecycleEvent`] to every configured sink, stamping it with
/// the monotonic clock and a process-wide sequence number.
pub fn emit(sinks: &[std::sync::Arc<dyn LifecycleSink>], event: LifecycleEvent) {
    let ts_ms = monotonic_ms();
    let seq = EVENT_SEQ.fetch_add(1, Ordering::Relaxed);
    for sink in sinks {
        sink.record(event.clone(), ts_ms, seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn emit_delivers_the_same_event_to_every_sink_in_order() {
        let a = Arc::new(RecordingLifecycleSink::new());
        let b = Arc::new(RecordingLifecycleSink::new());
        let sinks: Vec<Arc<dyn LifecycleSink>> = vec![a.clone(), b.clone()];

        emit(&sinks, LifecycleEvent::WorkerSpawned { group: "execution.ingress".to_string(), worker_id: "execution.ingress#1".to_string() });
        emit(&sinks, LifecycleEvent::WorkerReady { group: "execution.ingress".to_string(), worker_id: "execution.ingress#1".to_string() });

        assert_eq!(a.events().len(), 2);
        assert_eq!(b.events().len(), 2);
        assert_eq!(a.events()[0].name(), "worker_spawned");
        assert_eq!(a.events()[1].name(), "worker_ready");
    }

    #[test]
    fn event_names_match_spec_lifecycle_log_event_strings() {
        assert_eq!(LifecycleEvent::WorkerFailed { group: "g".to_string(), worker_id: "w".to_string(), reason: "r".to_string() }.name(), "worker_failed");
        assert_eq!(LifecycleEvent::RouteCacheInvalidated { generation: 1 }.name(), "route_cache_invalidated");
        assert_eq!(LifecycleEvent::ControlChannelUnavailable { group: "g".to_string(), worker_id: "w".to_string() }.name(), "control_channel_unavailable");
    }
}
