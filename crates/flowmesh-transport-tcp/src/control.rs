//! The three-phase control plane (spec §4.9): bootstrap → ready → start.
//!
//! Split into [`ControlPlaneSession`] (a pure, side-effect-free state
//! machine over `bootstrapped_workers`/`ready_workers`) and
//! [`ControlPlaneChannel`] (the wire codec built on
//! [`crate::transport::SecureTcpTransport`]), exactly as the original
//! splits `ControlPlaneSession`/`ControlPlaneChannel` (spec §12) — the
//! gating logic is unit-testable without a socket.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ControlPlaneError;

/// Control plane message kinds (spec §6).
pub const KIND_BOOTSTRAP_BUNDLE: &str = "control.bootstrap_bundle";
pub const KIND_READY: &str = "control.ready";
pub const KIND_HEARTBEAT: &str = "control.heartbeat";
pub const KIND_START_WORK: &str = "control.start_work";
pub const KIND_STOP: &str = "control.stop";
pub const KIND_ACK: &str = "control.ack";

pub fn control_kinds() -> std::collections::HashSet<String> {
    [KIND_BOOTSTRAP_BUNDLE, KIND_READY, KIND_HEARTBEAT, KIND_START_WORK, KIND_STOP, KIND_ACK]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `{ kind, correlation_id, worker_id?, payload }` from spec §3. `payload`
/// is left as opaque JSON since its shape depends on `kind`
/// (a `ChildBootstrapBundle` for `bootstrap_bundle`, empty for the rest).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ControlMessage {
    pub fn new(kind: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            correlation_id: correlation_id.into(),
            worker_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    fn ack(correlation_id: &str) -> Self {
        Self::new(KIND_ACK, correlation_id)
    }
}

/// Pure state machine for one supervisor's control session (spec §4.9
/// "States tracked"). No I/O; [`ControlPlaneChannel`] wraps this with the
/// wire transport.
#[derive(Default)]
pub struct ControlPlaneSession {
    bootstrapped_workers: BTreeSet<String>,
    ready_workers: BTreeSet<String>,
}

impl ControlPlaneSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bootstrapped_workers(&self) -> &BTreeSet<String> {
        &self.bootstrapped_workers
    }

    pub fn ready_workers(&self) -> &BTreeSet<String> {
        &self.ready_workers
    }

    /// Validates the message carries a non-empty `correlation_id` and
    /// `worker_id` — the shared precondition every transition checks
    /// before inspecting kind-specific state.
    fn require_worker_id(message: &ControlMessage) -> Result<&str, ControlPlaneError> {
        if message.correlation_id.is_empty() {
            return Err(ControlPlaneError::Protocol("<missing correlation_id>".to_string()));
        }
        message
            .worker_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ControlPlaneError::Protocol("<missing worker_id>".to_string()))
    }

    /// `bootstrap_bundle(worker_id)`: reject a repeat bootstrap, else
    /// record and ACK (spec §4.9).
    pub fn bootstrap_bundle(&mut self, message: &ControlMessage) -> Result<ControlMessage, ControlPlaneError> {
        let worker_id = Self::require_worker_id(message)?.to_string();
        if !self.bootstrapped_workers.insert(worker_id.clone()) {
            return Err(ControlPlaneError::DuplicateBootstrap(worker_id));
        }
        Ok(ControlMessage::ack(&message.correlation_id))
    }

    /// `ready(worker_id)`: requires the worker already bootstrapped.
    pub fn ready(&mut self, message: &ControlMessage) -> Result<ControlMessage, ControlPlaneError> {
        let worker_id = Self::require_worker_id(message)?.to_string();
        if !self.bootstrapped_workers.contains(&worker_id) {
            return Err(ControlPlaneError::Protocol(worker_id));
        }
        self.ready_workers.insert(worker_id);
        Ok(ControlMessage::ack(&message.correlation_id))
    }

    /// `start_work(required_workers?)`: every required worker must already
    /// be ready.
    pub fn start_work(&self, message: &ControlMessage, required_workers: Option<&[String]>) -> Result<ControlMessage, ControlPlaneError> {
        if message.correlation_id.is_empty() {
            return Err(ControlPlaneError::Protocol("<missing correlation_id>".to_string()));
        }
        if let Some(required) = required_workers {
            let missing: Vec<String> = required.iter().filter(|w| !self.ready_workers.contains(*w)).cloned().collect();
            if !missing.is_empty() {
                return Err(ControlPlaneError::StartBeforeReady { missing });
            }
        }
        Ok(ControlMessage::ack(&message.correlation_id))
    }

    /// `heartbeat` / `stop`: ACK unconditionally (spec §4.9).
    pub fn ack_unconditionally(&self, message: &ControlMessage) -> ControlMessage {
        ControlMessage::ack(&message.correlation_id)
    }
}

/// Per-worker control sessions, as the supervisor actually needs (one
/// [`ControlPlaneSession`] tracks a single worker's bootstrapped/ready
/// booleans in the original; the supervisor multiplies that over its
/// worker table).
#[derive(Default)]
pub struct ControlPlaneRegistry {
    session: ControlPlaneSession,
}

impl ControlPlaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, message: ControlMessage, required_workers: Option<&[String]>) -> Result<ControlMessage, ControlPlaneError> {
        match message.kind.as_str() {
            KIND_BOOTSTRAP_BUNDLE => self.session.bootstrap_bundle(&message),
            KIND_READY => self.session.ready(&message),
            KIND_START_WORK => self.session.start_work(&message, required_workers),
            KIND_HEARTBEAT | KIND_STOP => Ok(self.session.ack_unconditionally(&message)),
            other => Err(ControlPlaneError::Protocol(format!("unknown control kind '{other}'"))),
        }
    }

    pub fn session(&self) -> &ControlPlaneSession {
        &self.session
    }
}

pub type CorrelationMap<T> = HashMap<String, T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_bootstrap_is_rejected() {
        let mut session = ControlPlaneSession::new();
        let msg = ControlMessage::new(KIND_BOOTSTRAP_BUNDLE, "c1").with_worker_id("w1");
        session.bootstrap_bundle(&msg).unwrap();
        let err = session.bootstrap_bundle(&msg).unwrap_err();
        assert!(matches!(err, ControlPlaneError::DuplicateBootstrap(id) if id == "w1"));
    }

    #[test]
    fn ready_before_bootstrap_is_a_protocol_error() {
        let mut session = ControlPlaneSession::new();
        let msg = ControlMessage::new(KIND_READY, "c1").with_worker_id("w1");
        assert!(matches!(session.ready(&msg), Err(ControlPlaneError::Protocol(_))));
    }

    #[test]
    fn start_work_before_any_ready_fails_then_succeeds_once_ready() {
        let mut session = ControlPlaneSession::new();
        let bootstrap = ControlMessage::new(KIND_BOOTSTRAP_BUNDLE, "c1").with_worker_id("w1");
        session.bootstrap_bundle(&bootstrap).unwrap();

        let start = ControlMessage::new(KIND_START_WORK, "c2");
        let required = vec!["w1".to_string()];
        assert!(matches!(
            session.start_work(&start, Some(&required)),
            Err(ControlPlaneError::StartBeforeReady { .. })
        ));

        let ready = ControlMessage::new(KIND_READY, "c3").with_worker_id("w1");
        session.ready(&ready).unwrap();
        assert!(session.start_work(&start, Some(&required)).is_ok());
    }

    #[test]
    fn heartbeat_and_stop_always_ack() {
        let session = ControlPlaneSession::new();
        let hb = ControlMessage::new(KIND_HEARTBEAT, "c1");
        let ack = session.ack_unconditionally(&hb);
        assert_eq!(ack.kind, KIND_ACK);
        assert_eq!(ack.correlation_id, "c1");
    }
}
