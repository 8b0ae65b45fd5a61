//! `RuntimeConfig`: a `serde`-deserializable model of the configuration
//! keys spec §6 lists, loadable from TOML (SPEC_FULL.md §11 "Ambient
//! stack"). Unknown keys are preserved via a flattened extra map so
//! downstream, domain-specific config sections round-trip even though this
//! kernel never interprets them (the fund-load policy pipeline's own
//! settings, for instance).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub runtime: RuntimeSection,
    /// `adapters.<role>.{settings, binds}` — keyed by role name, spec §6.
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,
    /// Anything this kernel does not itself interpret (e.g. the fund-load
    /// domain's own config section) round-trips here untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default)]
    pub discovery_modules: Vec<String>,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub ordering: OrderingConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            strict: true,
            discovery_modules: Vec::new(),
            platform: PlatformConfig::default(),
            ordering: OrderingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub execution_ipc: ExecutionIpcConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub process_groups: Vec<ProcessGroupConfig>,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub routing_cache: RoutingCacheConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "default_kv_backend")]
    pub backend: String,
}

fn default_kv_backend() -> String {
    "memory".to_string()
}

impl Default for KvConfig {
    fn default() -> Self {
        Self { backend: default_kv_backend() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionIpcConfig {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub bind_host: Option<String>,
    #[serde(default)]
    pub bind_port: Option<u16>,
    #[serde(default)]
    pub max_payload_bytes: Option<u32>,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_transport() -> String {
    "memory".to_string()
}

impl Default for ExecutionIpcConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            bind_host: None,
            bind_port: None,
            max_payload_bytes: None,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub secret_mode: Option<String>,
    #[serde(default)]
    pub kdf: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub nonce_cache_size: Option<usize>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_bootstrap_mode")]
    pub mode: String,
}

fn default_bootstrap_mode() -> String {
    "inline".to_string()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { mode: default_bootstrap_mode() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessGroupConfig {
    pub name: String,
    pub workers: usize,
    pub nodes: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,
    #[serde(default = "default_graceful_timeout")]
    pub graceful_timeout_seconds: u64,
    #[serde(default)]
    pub drain_inflight: bool,
}

fn default_ready_timeout() -> u64 {
    10
}
fn default_graceful_timeout() -> u64 {
    15
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_timeout_seconds: default_ready_timeout(),
            graceful_timeout_seconds: default_graceful_timeout(),
            drain_inflight: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub negative_cache: bool,
    #[serde(default = "default_route_cache_entries")]
    pub max_entries: usize,
}

fn default_route_cache_entries() -> usize {
    1024
}

impl Default for RoutingCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            negative_cache: false,
            max_entries: default_route_cache_entries(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkOrderingMode {
    Completion,
    SourceSeq,
}

impl Default for SinkOrderingMode {
    fn default() -> Self {
        SinkOrderingMode::Completion
    }
}

impl From<SinkOrderingMode> for flowmesh_core::runner::OrderedSinkMode {
    fn from(mode: SinkOrderingMode) -> Self {
        match mode {
            SinkOrderingMode::Completion => flowmesh_core::runner::OrderedSinkMode::Completion,
            SinkOrderingMode::SourceSeq => flowmesh_core::runner::OrderedSinkMode::SourceSeq,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrderingConfig {
    #[serde(default)]
    pub sink_mode: SinkOrderingMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExporterConfig {
    pub kind: String,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub exporters: Vec<ExporterConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LifecycleEventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub exporters: Vec<ExporterConfig>,
    #[serde(default)]
    pub lifecycle_events: LifecycleEventsConfig,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub binds: Vec<String>,
}

impl RuntimeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
