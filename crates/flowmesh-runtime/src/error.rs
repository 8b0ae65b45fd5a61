//! Runtime-level error taxonomy (spec §7): configuration/validation errors
//! that fail fast before any process is spawned, lifecycle errors from the
//! supervisor, and boundary-dispatch errors. Every category names the
//! resource involved (group, node, trace) and never the secret or a raw
//! payload.

use flowmesh_core::error::{DagError, InjectionError, RunnerError};
use flowmesh_transport_tcp::error::{ControlPlaneError, TransportError};

/// Configuration / validation errors (spec §7.1), raised by
/// [`crate::builder::RuntimeBuilder`] before `start_groups` is ever called.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown adapter role '{0}'")]
    UnknownAdapterRole(String),
    #[error("node '{0}' is placed in more than one process group")]
    DuplicatePlacement(String),
    #[error("unknown kv backend '{0}'; only \"memory\" is accepted")]
    UnknownKvBackend(String),
    #[error("unknown execution_ipc transport '{0}'")]
    UnknownTransport(String),
    #[error("runtime.platform.execution_ipc.bind_host must be 127.0.0.1 for tcp_local")]
    NonLocalBindHost,
    #[error("discovery module '{0}' not registered")]
    UnknownDiscoveryModule(String),
    #[error("unknown runtime.platform.bootstrap.mode '{0}'; expected \"inline\" or \"process_supervisor\"")]
    UnknownBootstrapMode(String),
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error(transparent)]
    Injection(#[from] InjectionError),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime lifecycle errors (spec §7.2). Deterministic categories; the
/// supervisor raises only the first primary failure.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("failed to resolve lifecycle collaborators from the scenario scope: {0}")]
    Resolution(String),
    #[error("wait_ready timed out before all workers in {group} reported ready")]
    Ready { group: String },
    #[error("failed to resolve child bootstrap collaborators: {0}")]
    BootstrapResolution(String),
    #[error("failed to start process group '{0}'")]
    BootstrapStart(String),
    #[error("stop_groups exceeded its graceful_timeout_seconds for group '{0}'")]
    StopTimeout(String),
    #[error("stop_groups failed for group '{group}': {detail}")]
    Stop { group: String, detail: String },
    #[error("worker '{0}' exited before it could complete its assigned work")]
    WorkerFailed(String),
}

/// Boundary-dispatch errors (spec §7.5). `category` mirrors the
/// `execute_boundary_error` wire shape's `category` field.
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("remote handoff timed out for group '{0}'")]
    Timeout(String),
    #[error("remote handoff transport failed for group '{0}'")]
    Transport(String),
    #[error("remote handoff failed for group '{0}'")]
    Execution(String),
}

/// Errors raised rebuilding a runtime from a [`crate::bundle::ChildBootstrapBundle`]
/// inside a worker process (spec §4.11).
#[derive(Debug, thiserror::Error)]
pub enum ChildRuntimeBootstrapError {
    #[error("unknown dispatch target '{0}' for this process group")]
    UnknownTarget(String),
    #[error("node '{node}' failed inside child runtime: {detail}")]
    NodeFailed { node: String, detail: String },
    #[error("failed to resolve '{0}' from the child scenario scope")]
    MissingCollaborator(String),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Top-level error returned by [`crate::builder::RuntimeBuilder::execute_runtime_artifacts`],
/// unifying every category above the way `execute_runtime_artifacts` must
/// (spec §4.13: "Primary worker errors take precedence over shutdown errors
/// when both occur").
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
    #[error(transparent)]
    ChildBootstrap(#[from] ChildRuntimeBootstrapError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_error_messages_name_the_group_and_nothing_else() {
        let err = BoundaryError::Timeout("execution.policy".to_string());
        assert_eq!(err.to_string(), "remote handoff timed out for group 'execution.policy'");

        let err = BoundaryError::Transport("execution.policy".to_string());
        assert_eq!(err.to_string(), "remote handoff transport failed for group 'execution.policy'");
    }

    #[test]
    fn runtime_error_from_conversions_preserve_the_underlying_message() {
        let config_err: RuntimeError = ConfigError::NonLocalBindHost.into();
        assert!(config_err.to_string().contains("127.0.0.1"));

        let lifecycle_err: RuntimeError = LifecycleError::WorkerFailed("execution.egress#1".to_string()).into();
        assert!(lifecycle_err.to_string().contains("execution.egress#1"));
    }
}
