//! The in-flight work unit (spec §3 "Envelope") and the only payload shape
//! that exits the graph instead of being routed (`TerminalEvent`).

use crate::contract::Payload;

/// Terminal outcome status (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalStatus {
    Success,
    Error,
    Cancelled,
    Timeout,
}

/// `TerminalEvent`: the only payload type that exits the graph rather than
/// being routed; correlated back to ingress via `trace_id`.
#[derive(Clone)]
pub struct TerminalEvent {
    pub status: TerminalStatus,
    pub payload: Option<Payload>,
    pub error: Option<String>,
}

impl std::fmt::Debug for TerminalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalEvent")
            .field("status", &self.status)
            .field("has_payload", &self.payload.is_some())
            .field("error", &self.error)
            .finish()
    }
}

impl TerminalEvent {
    pub fn success(payload: Option<Payload>) -> Self {
        Self {
            status: TerminalStatus::Success,
            payload,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TerminalStatus::Error,
            payload: None,
            error: Some(message.into()),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: TerminalStatus::Cancelled,
            payload: None,
            error: Some(reason.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: TerminalStatus::Timeout,
            payload: None,
            error: Some("reply_timeout".to_string()),
        }
    }
}

/// Either a plain payload or a `TerminalEvent`; the two cases the runner and
/// router must distinguish everywhere an "output" is produced.
pub enum NodeOutput {
    Payload(Payload),
    Terminal(TerminalEvent),
    /// A payload wrapped in full envelope metadata: lets a node emit an
    /// explicit target, trace override, reply-to override or span-id hint.
    Envelope(Envelope),
}

/// Immutable unit of in-flight work (spec §3).
///
/// Invariant: once the [`crate::runner::SyncRunner`] pops an `Envelope`,
/// either `target` is set or the payload carries a `TerminalEvent` — the
/// runner enforces this at pop time, never earlier.
#[derive(Clone)]
pub struct Envelope {
    pub payload: Payload,
    pub target: Option<String>,
    pub trace_id: Option<String>,
    pub reply_to: Option<String>,
    pub span_id: Option<String>,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            target: None,
            trace_id: None,
            reply_to: None,
            span_id: None,
        }
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

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn envelope_builder_sets_every_field() {
        let envelope = Envelope::new(Arc::new(1u32) as Payload)
            .with_target("node-a")
            .with_trace_id("t1")
            .with_reply_to("http:req-1")
            .with_span_id("span-1");

        assert_eq!(envelope.target.as_deref(), Some("node-a"));
        assert_eq!(envelope.trace_id.as_deref(), Some("t1"));
        assert_eq!(envelope.reply_to.as_deref(), Some("http:req-1"));
        assert_eq!(envelope.span_id.as_deref(), Some("span-1"));
    }

    #[test]
    fn fresh_envelope_has_no_routing_metadata() {
        let envelope = Envelope::new(Arc::new(1u32) as Payload);
        assert!(envelope.target.is_none());
        assert!(envelope.trace_id.is_none());
        assert!(envelope.reply_to.is_none());
        assert!(envelope.span_id.is_none());
    }

    #[test]
    fn terminal_event_constructors_set_expected_status() {
        assert_eq!(TerminalEvent::success(None).status, TerminalStatus::Success);
        assert!(TerminalEvent::success(None).payload.is_none());

        let err = TerminalEvent::error("boom");
        assert_eq!(err.status, TerminalStatus::Error);
        assert_eq!(err.error.as_deref(), Some("boom"));

        let cancelled = TerminalEvent::cancelled("shutdown");
        assert_eq!(cancelled.status, TerminalStatus::Cancelled);
        assert_eq!(cancelled.error.as_deref(), Some("shutdown"));

        let timeout = TerminalEvent::timeout();
        assert_eq!(timeout.status, TerminalStatus::Timeout);
        assert!(timeout.error.is_some());
    }

    #[test]
    fn terminal_event_debug_never_exposes_payload_contents() {
        let event = TerminalEvent::success(Some(Arc::new("secret".to_string()) as Payload));
        let rendered = format!("{event:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("has_payload: true"));
    }
}
