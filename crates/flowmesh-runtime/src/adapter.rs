//! Adapter construction (spec §6 "Adapter contract"): the Rust replacement
//! for the source's `@adapter(name, kind, consumes, emits, binds)` decorator.
//!
//! A decorator can inspect a class at import time and defer instantiation
//! until settings are known; Rust has neither, so discovery and
//! instantiation are split into two explicit steps here: an
//! [`AdapterFactory`] describes *how* to build one role's adapter from its
//! `adapters.<role>.settings` map, and [`AdapterFactory::build`] both binds
//! whatever instances the adapter produces into the
//! [`flowmesh_core::injection::InjectionRegistry`] and hands back the
//! [`crate::discovery::AdapterRegistration`] the DAG validates against.

use std::collections::HashMap;
use std::sync::Arc;

use flowmesh_core::contract::Payload;
use flowmesh_core::injection::InjectionRegistry;

use crate::discovery::AdapterRegistration;
use crate::error::ConfigError;

/// A source adapter yields payloads to seed the graph (spec §6 `read()`).
/// Returns `None` once exhausted.
pub trait SourceAdapter: Send + Sync {
    fn read(&self) -> Option<Payload>;
}

/// A sink adapter consumes terminal payloads leaving the graph (spec §6
/// `consume()`).
pub trait SinkAdapter: Send + Sync {
    fn consume(&self, payload: Payload) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub trait AdapterFactory: Send + Sync {
    fn role(&self) -> &'static str;

    fn build(
        &self,
        settings: &serde_json::Map<String, serde_json::Value>,
        injection: &mut InjectionRegistry,
    ) -> Result<AdapterRegistration, ConfigError>;
}

/// Registered [`AdapterFactory`]s by role name, the input to
/// [`crate::builder::RuntimeBuilder::with_adapter_factory`] and
/// [`crate::child::bootstrap_child_runtime_from_bundle`].
#[derive(Default, Clone)]
pub struct AdapterFactoryRegistry {
    factories: HashMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(factory.role().to_string(), factory);
    }

    pub fn get(&self, role: &str) -> Option<&Arc<dyn AdapterFactory>> {
        self.factories.get(role)
    }
}
