//! Node and adapter discovery (spec §6 "Node contract" / "Adapter
//! contract", spec §9 "Dynamic decorator discovery").
//!
//! The source discovers `@node`/`@adapter`-decorated callables at import
//! time. Per the spec's Design Notes this crate replaces that with
//! explicit registration calls: callers build a [`DiscoveryRegistry`] by
//! calling [`DiscoveryRegistry::register_node`] /
//! [`DiscoveryRegistry::register_adapter`] in the order contracts should
//! be discovered — that order is observable in [`DiscoveryRegistry::contracts`]
//! and is exactly what feeds [`flowmesh_core::dag::build_dag`].

use std::collections::HashMap;
use std::sync::Arc;

use flowmesh_core::contract::{NodeContract, TypeTag};
use flowmesh_core::runner::Node;

/// One registered node: its contract plus the constructed [`Node`]
/// implementation the runner will invoke by name.
pub struct NodeRegistration {
    pub contract: NodeContract,
    pub node: Arc<dyn Node>,
    /// `service=true` per spec §6 "Node contract" — the node receives full,
    /// unfiltered context.
    pub service: bool,
}

/// `@adapter(name, kind, consumes, emits, binds)` from spec §6. `binds`
/// names the `(port_type, data_type)` pairs the adapter's factory
/// provides to the injection registry once instantiated.
pub struct AdapterRegistration {
    pub name: String,
    pub kind: String,
    pub consumes: Vec<TypeTag>,
    pub emits: Vec<TypeTag>,
    pub binds: Vec<(&'static str, TypeTag)>,
    /// Present when this adapter instance exposes `read()` — used to
    /// decide whether the builder attaches a source-ingress wrapper node
    /// (spec §4.13 step 7).
    pub source: Option<Arc<dyn crate::adapter::SourceAdapter>>,
    /// Present when this adapter instance exposes `consume()`.
    pub sink: Option<Arc<dyn crate::adapter::SinkAdapter>>,
}

/// Ordered discovery registry (spec §9 "discovery produces an ordered list
/// of contracts; order is observable").
#[derive(Default)]
pub struct DiscoveryRegistry {
    nodes: Vec<NodeRegistration>,
    adapters: Vec<AdapterRegistration>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&mut self, registration: NodeRegistration) {
        self.nodes.push(registration);
    }

    pub fn register_adapter(&mut self, registration: AdapterRegistration) {
        self.adapters.push(registration);
    }

    pub fn nodes(&self) -> &[NodeRegistration] {
        &self.nodes
    }

    pub fn adapters(&self) -> &[AdapterRegistration] {
        &self.adapters
    }

    pub fn adapter(&self, role: &str) -> Option<&AdapterRegistration> {
        self.adapters.iter().find(|a| a.name == role)
    }

    pub fn node(&self, name: &str) -> Option<&NodeRegistration> {
        self.nodes.iter().find(|n| n.contract.name == name)
    }

    /// Every node and external adapter contract, in discovery order — the
    /// input `flowmesh_core::dag::build_dag` consumes (spec §4.1).
    pub fn contracts(&self) -> Vec<NodeContract> {
        let mut contracts: Vec<NodeContract> = self.nodes.iter().map(|n| n.contract.clone()).collect();
        for adapter in &self.adapters {
            contracts.push(NodeContract::external(adapter.name.clone(), adapter.consumes.clone(), adapter.emits.clone()));
        }
        contracts
    }
}

/// Named discovery callbacks, keyed by the module name a
/// `runtime.discovery_modules` entry names (spec §6). Each callback
/// registers whatever nodes that logical module owns into the shared
/// [`DiscoveryRegistry`] — the explicit-call replacement for import-time
/// decorator discovery, run in declared order so registration order stays
/// observable.
#[derive(Default, Clone)]
pub struct DiscoveryModuleRegistry {
    modules: HashMap<String, Arc<dyn Fn(&mut DiscoveryRegistry) + Send + Sync>>,
}

impl DiscoveryModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, callback: Arc<dyn Fn(&mut DiscoveryRegistry) + Send + Sync>) {
        self.modules.insert(name.into(), callback);
    }

    /// Runs the named modules' callbacks, in the order given, into a fresh
    /// registry.
    pub fn discover(&self, module_names: &[String]) -> Result<DiscoveryRegistry, String> {
        let mut registry = DiscoveryRegistry::new();
        for name in module_names {
            let callback = self.modules.get(name).ok_or_else(|| name.clone())?;
            callback(&mut registry);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_core::envelope::NodeOutput;
    use flowmesh_core::runner::Node as NodeTrait;

    struct NoopNode;
    impl NodeTrait for NoopNode {
        fn invoke(&self, _payload: flowmesh_core::contract::Payload, _ctx: &flowmesh_core::context::Metadata) -> Result<Vec<NodeOutput>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(vec![])
        }
    }

    #[test]
    fn contracts_preserve_discovery_order_nodes_then_adapters() {
        let mut registry = DiscoveryRegistry::new();
        registry.register_node(NodeRegistration {
            contract: NodeContract::node("n1", vec![], vec![]),
            node: Arc::new(NoopNode),
            service: false,
        });
        registry.register_adapter(AdapterRegistration {
            name: "adapter-a".to_string(),
            kind: "source".to_string(),
            consumes: vec![],
            emits: vec![],
            binds: vec![],
            source: None,
            sink: None,
        });
        registry.register_node(NodeRegistration {
            contract: NodeContract::node("n2", vec![], vec![]),
            node: Arc::new(NoopNode),
            service: false,
        });

        let names: Vec<String> = registry.contracts().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["n1", "n2", "adapter-a"]);
    }

    #[test]
    fn lookup_by_name_finds_registered_node_and_adapter() {
        let mut registry = DiscoveryRegistry::new();
        registry.register_node(NodeRegistration {
            contract: NodeContract::node("n1", vec![], vec![]),
            node: Arc::new(NoopNode),
            service: false,
        });
        assert!(registry.node("n1").is_some());
        assert!(registry.node("missing").is_none());
        assert!(registry.adapter("n1").is_none());
    }

    #[test]
    fn discover_runs_named_modules_in_order() {
        let mut modules = DiscoveryModuleRegistry::new();
        modules.register(
            "module-a",
            Arc::new(|r: &mut DiscoveryRegistry| {
                r.register_node(NodeRegistration {
                    contract: NodeContract::node("a", vec![], vec![]),
                    node: Arc::new(NoopNode),
                    service: false,
                });
            }),
        );
        modules.register(
            "module-b",
            Arc::new(|r: &mut DiscoveryRegistry| {
                r.register_node(NodeRegistration {
                    contract: NodeContract::node("b", vec![], vec![]),
                    node: Arc::new(NoopNode),
                    service: false,
                });
            }),
        );

        let registry = modules.discover(&["module-b".to_string(), "module-a".to_string()]).expect("modules resolve");
        let names: Vec<String> = registry.nodes().iter().map(|n| n.contract.name.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn discover_fails_fast_on_unknown_module_name() {
        let modules = DiscoveryModuleRegistry::new();
        let err = modules.discover(&["missing-module".to_string()]).unwrap_err();
        assert_eq!(err, "missing-module");
    }
}
