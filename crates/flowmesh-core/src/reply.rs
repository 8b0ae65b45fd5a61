//! Correlated request/reply waiting (spec §4.9), grounded in
//! `original_source/src/stream_kernel/platform/services/messaging/reply_waiter.py`.
//!
//! A waiter is registered by `trace_id` with a deadline; exactly one of
//! `complete`, `cancel`, or `expire` may transition it to a terminal state —
//! everything after the first transition is a counted, sanitized no-op
//! rather than an error, so a slow duplicate reply can never corrupt an
//! already-delivered outcome.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::envelope::{TerminalEvent, TerminalStatus};
use crate::error::ReplyError;

/// One bounded, sanitized diagnostic event — no payload, error text, or
/// `reply_to` value ever appears here (spec §7 "never log payload bodies").
#[derive(Clone, Debug)]
pub struct ReplyDiagnosticEvent {
    pub kind: &'static str,
    pub trace_id: String,
    pub ts_epoch_seconds: u64,
    pub terminal_status: Option<TerminalStatus>,
}

/// Sanitized operational counters (spec §4.9).
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplyDiagnosticsCounters {
    pub registered: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub duplicate_terminal: u64,
    pub late_reply_drop: u64,
    pub in_flight: usize,
}

pub trait ReplyCoordinator: Send + Sync {
    fn register(&self, trace_id: &str, reply_to: &str, timeout_seconds: u64) -> Result<(), ReplyError>;
    /// Returns `true` only when this call transitioned the waiter to `Success`/`Error`.
    fn complete(&self, trace_id: &str, event: TerminalEvent) -> bool;
    /// Returns `true` only when this call transitioned the waiter to `Cancelled`.
    fn cancel(&self, trace_id: &str, reason: Option<&str>) -> bool;
    /// Transitions every waiter past its deadline to `Timeout`, returning the affected trace ids.
    fn expire(&self, now_epoch_seconds: u64) -> Vec<String>;
    fn poll(&self, trace_id: &str) -> Option<TerminalEvent>;
    fn in_flight(&self) -> usize;
}

struct WaiterState {
    #[allow(dead_code)] // carried for parity with the source waiter record; not yet consumed by callers
    reply_to: String,
    deadline_epoch_seconds: u64,
}

struct Inner {
    inflight: HashMap<String, WaiterState>,
    terminal: HashMap<String, TerminalEvent>,
    counters: ReplyDiagnosticsCounters,
    events: VecDeque<ReplyDiagnosticEvent>,
}

/// In-memory [`ReplyCoordinator`]. Bounds its diagnostic event log to
/// `max_diagnostic_events` (floored at 16, matching the source default).
pub struct InMemoryReplyCoordinator {
    inner: Mutex<Inner>,
    now_fn: Arc<dyn Fn() -> u64 + Send + Sync>,
    max_diagnostic_events: usize,
}

impl InMemoryReplyCoordinator {
    pub fn new(now_fn: Arc<dyn Fn() -> u64 + Send + Sync>, max_diagnostic_events: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                inflight: HashMap::new(),
                terminal: HashMap::new(),
                counters: ReplyDiagnosticsCounters::default(),
                events: VecDeque::new(),
            }),
            now_fn,
            max_diagnostic_events: max_diagnostic_events.max(16),
        }
    }

    pub fn diagnostics_counters(&self) -> ReplyDiagnosticsCounters {
        let inner = self.inner.lock();
        ReplyDiagnosticsCounters {
            in_flight: inner.inflight.len(),
            ..inner.counters
        }
    }

    pub fn diagnostic_events(&self) -> Vec<ReplyDiagnosticEvent> {
        self.inner.lock().events.iter().cloned().collect()
    }

    fn record(inner: &mut Inner, max_events: usize, kind: &'static str, trace_id: &str, ts: u64, status: Option<TerminalStatus>) {
        inner.events.push_back(ReplyDiagnosticEvent {
            kind,
            trace_id: trace_id.to_string(),
            ts_epoch_seconds: ts,
            terminal_status: status,
        });
        while inner.events.len() > max_events {
            inner.events.pop_front();
        }
    }

    /// Shared tail of `complete`/`cancel`: neither can transition a trace_id
    /// that is not currently in flight, and both count the miss identically
    /// depending on whether a terminal outcome already exists.
    fn reject_non_inflight(inner: &mut Inner, max_events: usize, trace_id: &str, now: u64, status: TerminalStatus) -> bool {
        if inner.terminal.contains_key(trace_id) {
            inner.counters.duplicate_terminal += 1;
            Self::record(inner, max_events, "duplicate_terminal", trace_id, now, Some(status));
        } else {
            inner.counters.late_reply_drop += 1;
            Self::record(inner, max_events, "late_reply_drop", trace_id, now, Some(status));
        }
        false
    }
}

impl ReplyCoordinator for InMemoryReplyCoordinator {
    fn register(&self, trace_id: &str, reply_to: &str, timeout_seconds: u64) -> Result<(), ReplyError> {
        if trace_id.is_empty() {
            return Err(ReplyError::EmptyTraceId);
        }
        if reply_to.is_empty() {
            return Err(ReplyError::EmptyReplyTo);
        }
        if timeout_seconds == 0 {
            return Err(ReplyError::InvalidTimeout);
        }
        let now = (self.now_fn)();
        let mut inner = self.inner.lock();
        if inner.inflight.contains_key(trace_id) {
            return Err(ReplyError::AlreadyRegistered(trace_id.to_string()));
        }
        inner.inflight.insert(
            trace_id.to_string(),
            WaiterState {
                reply_to: reply_to.to_string(),
                deadline_epoch_seconds: now + timeout_seconds,
            },
        );
        inner.terminal.remove(trace_id);
        inner.counters.registered += 1;
        let max_events = self.max_diagnostic_events;
        Self::record(&mut inner, max_events, "registered", trace_id, now, None);
        Ok(())
    }

    fn complete(&self, trace_id: &str, event: TerminalEvent) -> bool {
        let now = (self.now_fn)();
        let max_events = self.max_diagnostic_events;
        let mut inner = self.inner.lock();
        if !inner.inflight.contains_key(trace_id) {
            return Self::reject_non_inflight(&mut inner, max_events, trace_id, now, event.status);
        }
        if inner.terminal.contains_key(trace_id) {
            inner.counters.duplicate_terminal += 1;
            Self::record(&mut inner, max_events, "duplicate_terminal", trace_id, now, Some(event.status));
            return false;
        }
        inner.inflight.remove(trace_id);
        let status = event.status;
        inner.terminal.insert(trace_id.to_string(), event);
        inner.counters.completed += 1;
        Self::record(&mut inner, max_events, "completed", trace_id, now, Some(status));
        true
    }

    fn cancel(&self, trace_id: &str, reason: Option<&str>) -> bool {
        let now = (self.now_fn)();
        let max_events = self.max_diagnostic_events;
        let mut inner = self.inner.lock();
        if !inner.inflight.contains_key(trace_id) {
            return Self::reject_non_inflight(&mut inner, max_events, trace_id, now, TerminalStatus::Cancelled);
        }
        inner.inflight.remove(trace_id);
        inner
            .terminal
            .insert(trace_id.to_string(), TerminalEvent::cancelled(reason.unwrap_or("cancelled")));
        inner.counters.cancelled += 1;
        Self::record(&mut inner, max_events, "cancelled", trace_id, now, Some(TerminalStatus::Cancelled));
        true
    }

    fn expire(&self, now_epoch_seconds: u64) -> Vec<String> {
        let max_events = self.max_diagnostic_events;
        let mut inner = self.inner.lock();
        let due: Vec<String> = inner
            .inflight
            .iter()
            .filter(|(_, state)| now_epoch_seconds >= state.deadline_epoch_seconds)
            .map(|(trace_id, _)| trace_id.clone())
            .collect();
        for trace_id in &due {
            inner.inflight.remove(trace_id);
            inner.terminal.insert(trace_id.clone(), TerminalEvent::timeout());
            inner.counters.expired += 1;
            Self::record(&mut inner, max_events, "expired", trace_id, now_epoch_seconds, Some(TerminalStatus::Timeout));
        }
        due
    }

    fn poll(&self, trace_id: &str) -> Option<TerminalEvent> {
        self.inner.lock().terminal.get(trace_id).cloned()
    }

    fn in_flight(&self) -> usize {
        self.inner.lock().inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn fixed_clock(seconds: u64) -> Arc<dyn Fn() -> u64 + Send + Sync> {
        let now = Arc::new(AtomicU64::new(seconds));
        Arc::new(move || now.load(Ordering::SeqCst))
    }

    #[test]
    fn register_then_complete_transitions_exactly_once() {
        let coordinator = InMemoryReplyCoordinator::new(fixed_clock(0), 256);
        coordinator.register("t1", "reply:t1", 30).unwrap();
        assert_eq!(coordinator.in_flight(), 1);

        assert!(coordinator.complete("t1", TerminalEvent::success(None)));
        assert_eq!(coordinator.in_flight(), 0);
        assert!(coordinator.poll("t1").is_some());

        // A second completion for the same trace_id is a counted no-op.
        assert!(!coordinator.complete("t1", TerminalEvent::success(None)));
        assert_eq!(coordinator.diagnostics_counters().duplicate_terminal, 1);
    }

    #[test]
    fn late_reply_for_unknown_trace_id_is_dropped_and_counted() {
        let coordinator = InMemoryReplyCoordinator::new(fixed_clock(0), 256);
        assert!(!coordinator.complete("never-registered", TerminalEvent::success(None)));
        assert_eq!(coordinator.diagnostics_counters().late_reply_drop, 1);
    }

    #[test]
    fn expire_moves_overdue_waiters_to_timeout() {
        let coordinator = InMemoryReplyCoordinator::new(fixed_clock(0), 256);
        coordinator.register("t1", "reply:t1", 10).unwrap();
        assert!(coordinator.expire(5).is_empty());
        let expired = coordinator.expire(10);
        assert_eq!(expired, vec!["t1".to_string()]);
        assert!(matches!(coordinator.poll("t1").unwrap().status, TerminalStatus::Timeout));
    }

    #[test]
    fn cancel_is_idempotent_after_the_first_call() {
        let coordinator = InMemoryReplyCoordinator::new(fixed_clock(0), 256);
        coordinator.register("t1", "reply:t1", 10).unwrap();
        assert!(coordinator.cancel("t1", Some("operator requested")));
        assert!(!coordinator.cancel("t1", Some("operator requested")));
        assert_eq!(coordinator.diagnostics_counters().cancelled, 1);
        assert_eq!(coordinator.diagnostics_counters().duplicate_terminal, 1);
    }

    #[test]
    fn register_rejects_duplicate_in_flight_trace_id() {
        let coordinator = InMemoryReplyCoordinator::new(fixed_clock(0), 256);
        coordinator.register("t1", "reply:t1", 10).unwrap();
        let err = coordinator.register("t1", "reply:t1", 10).unwrap_err();
        assert!(matches!(err, ReplyError::AlreadyRegistered(id) if id == "t1"));
    }

    #[test]
    fn diagnostic_event_log_is_bounded() {
        let coordinator = InMemoryReplyCoordinator::new(fixed_clock(0), 16);
        for i in 0..40 {
            let trace_id = format!("t{i}");
            coordinator.register(&trace_id, "reply", 10).unwrap();
        }
        assert!(coordinator.diagnostic_events().len() <= 16);
    }
}
