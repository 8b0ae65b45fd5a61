//! `ChildBootstrapBundle` (spec §3): the metadata-only blueprint a worker
//! uses to rebuild a full runtime. Serializable and carries no live object
//! graphs — discovery modules are plain strings, config is a JSON value,
//! and the key material travels as the already-serializable
//! [`flowmesh_transport_tcp::keybundle::BootstrapKeyBundle`] (spec §5
//! "Process boundary discipline").

use serde::{Deserialize, Serialize};

use flowmesh_transport_tcp::keybundle::BootstrapKeyBundle;

#[derive(Clone, Serialize, Deserialize)]
pub struct ChildBootstrapBundle {
    pub scenario_id: String,
    pub process_group: String,
    pub discovery_modules: Vec<String>,
    pub runtime_config: serde_json::Value,
    pub adapters: serde_json::Value,
    pub key_bundle: BootstrapKeyBundle,
}

impl ChildBootstrapBundle {
    /// Specializes this parent-wide bundle for one process group, as
    /// `start_groups` does per child (spec §4.10 step 5: "a
    /// group-specialized child bundle").
    pub fn specialize_for_group(&self, process_group: &str) -> Self {
        Self {
            process_group: process_group.to_string(),
            ..self.clone()
        }
    }
}

/// One input to `execute_boundary` (spec §4.10). Raw envelopes with
/// targets are normalized to this shape up front so the dispatch loop has
/// one input type to group and re-queue.
#[derive(Clone, Serialize, Deserialize)]
pub struct BoundaryDispatchInput {
    pub payload_b64: String,
    pub dispatch_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_group: Option<String>,
    #[serde(default)]
    pub route_hop: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

impl BoundaryDispatchInput {
    /// Bumps `route_hop` and sets `source_group`, as the supervisor does
    /// when a terminal output re-targets a node in yet another group
    /// (spec §4.10 step 4 "hop count bumped").
    pub fn rehop(&self, from_group: &str) -> Self {
        Self {
            source_group: Some(from_group.to_string()),
            route_hop: self.route_hop + 1,
            ..self.clone()
        }
    }
}
