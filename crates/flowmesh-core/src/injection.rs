//! Per-scenario dependency injection (spec §4.7), grounded in
//! `original_source/src/stream_kernel/application_context/injection_registry.py`.
//!
//! The source registry keys bindings on `(port_type, data_type, qualifier)`
//! where `data_type` is a runtime Python type and "marker contract" bindings
//! are validated by reflective `issubclass` checks and field introspection.
//! Rust has neither, so two substitutions are made here (see
//! `SPEC_FULL.md` §13):
//!
//! - `data_type` becomes [`TypeTag`], exactly as in [`crate::registry`].
//! - the KV "marker contract must extend the base KV trait with no added
//!   methods" runtime check becomes the [`KvMarker`] trait bound, enforced
//!   by the compiler at `register_kv` call sites instead of at scope-build
//!   time.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::contract::TypeTag;
use crate::error::{BindingKeyDisplay, InjectionError};

/// Well-known port type for key-value store bindings; the one port type
/// with marker-contract fallback semantics (see [`KvMarker`]).
pub const KV_PORT: &str = "kv";

/// Marker trait for key-value store implementations. A type bound by
/// `KvMarker` can stand in for the base `kv<KVStore>` binding when no
/// exact-type binding is registered (spec §12 "KV marker-contract
/// isolation").
pub trait KvMarker: Any + Send + Sync {}

/// Lifecycle hook for a bound instance. `ScenarioScope::close` calls
/// `shutdown` exactly once per instance it still holds (spec.md:369 "scope
/// close tears down every instance it created"). Registering a binding via
/// `register_factory` (no `Shutdown` bound) simply means close has nothing
/// to invoke for it — the bound type has no teardown concern.
pub trait Shutdown: Send + Sync {
    fn shutdown(&self);
}

/// Two-phase init hook for an instance that itself depends on other
/// scenario-scoped bindings (spec §4.7 step 2: "scan each instance's
/// declared injection fields and fill them by resolving against the new
/// scope — this is how services-inside-services get their dependencies").
/// Factories stay zero-argument (`Fn() -> T`, the same shape the source's
/// eager-construction pass uses); an implementor instead holds its
/// dependencies behind interior mutability (`OnceLock`, `Mutex<Option<_>>`,
/// ...) and fills them in `inject_from_scope`, which
/// [`InjectionRegistry::instantiate_for_scenario`] calls exactly once per
/// instance after every binding in the scope has been constructed.
pub trait ScopeInjected: Send + Sync {
    fn inject_from_scope(&self, scope: &ScenarioScope);
}

/// A fully resolved instance, type-erased for uniform storage across
/// unrelated bindings.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A zero-argument constructor for an [`Instance`].
pub type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// Downcasts a stored [`Instance`] back to its concrete type and calls
/// [`Shutdown::shutdown`] on it. Captured at registration time, when the
/// concrete type is still known.
type ShutdownHook = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Downcasts a stored [`Instance`] back to its concrete type and calls
/// [`ScopeInjected::inject_from_scope`] on it. Captured at registration
/// time, when the concrete type is still known.
type InjectHook = Arc<dyn Fn(&Instance, &ScenarioScope) + Send + Sync>;

type BindingKey = (&'static str, TypeTag, Option<String>);

struct Binding {
    factory: Factory,
    is_async: bool,
    shutdown: Option<ShutdownHook>,
    inject: Option<InjectHook>,
}

struct StoredInstance {
    instance: Instance,
    shutdown: Option<ShutdownHook>,
}

#[derive(Default, Clone)]
pub struct BindingOptions {
    pub is_async: bool,
    pub qualifier: Option<String>,
}

fn normalize_qualifier(qualifier: Option<&str>) -> Result<Option<String>, InjectionError> {
    match qualifier {
        None => Ok(None),
        Some(q) if q.is_empty() => Err(InjectionError::EmptyQualifier),
        Some(q) => Ok(Some(q.to_string())),
    }
}

/// Registry of factories keyed by `(port_type, data_type, qualifier)`
/// (spec §4.7). Built once per process; [`InjectionRegistry::instantiate_for_scenario`]
/// produces one fresh [`ScenarioScope`] per run.
#[derive(Default)]
pub struct InjectionRegistry {
    bindings: HashMap<BindingKey, Binding>,
}

impl InjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `T` under `port_type`, optionally qualified.
    pub fn register_factory<T: Send + Sync + 'static>(
        &mut self,
        port_type: &'static str,
        factory: impl Fn() -> T + Send + Sync + 'static,
        options: BindingOptions,
    ) -> Result<(), InjectionError> {
        self.register_binding(port_type, factory, options, None, None)
    }

    /// Registers a factory for a `T: Shutdown`, wiring `ScenarioScope::close`
    /// to call `shutdown()` on the instance it produces.
    pub fn register_factory_with_shutdown<T: Shutdown + Send + Sync + 'static>(
        &mut self,
        port_type: &'static str,
        factory: impl Fn() -> T + Send + Sync + 'static,
        options: BindingOptions,
    ) -> Result<(), InjectionError> {
        self.register_binding(port_type, factory, options, Some(Self::shutdown_hook::<T>()), None)
    }

    /// Registers a factory for a `T: ScopeInjected`. Once every binding in
    /// the scope has been constructed, `T::inject_from_scope` is called
    /// exactly once with the finished scope so this instance can resolve
    /// its own scenario-scoped dependencies (spec §4.7 step 2
    /// "services-inside-services").
    pub fn register_factory_with_injection<T: ScopeInjected + Send + Sync + 'static>(
        &mut self,
        port_type: &'static str,
        factory: impl Fn() -> T + Send + Sync + 'static,
        options: BindingOptions,
    ) -> Result<(), InjectionError> {
        self.register_binding(port_type, factory, options, None, Some(Self::inject_hook::<T>()))
    }

    /// Registers a factory for a `T: Shutdown + ScopeInjected`, combining
    /// [`register_factory_with_shutdown`] and
    /// [`register_factory_with_injection`] for a service that needs both.
    pub fn register_factory_with_shutdown_and_injection<T: Shutdown + ScopeInjected + Send + Sync + 'static>(
        &mut self,
        port_type: &'static str,
        factory: impl Fn() -> T + Send + Sync + 'static,
        options: BindingOptions,
    ) -> Result<(), InjectionError> {
        self.register_binding(port_type, factory, options, Some(Self::shutdown_hook::<T>()), Some(Self::inject_hook::<T>()))
    }

    fn shutdown_hook<T: Shutdown + Send + Sync + 'static>() -> ShutdownHook {
        Arc::new(|instance: &Instance| {
            if let Some(typed) = instance.downcast_ref::<T>() {
                typed.shutdown();
            }
        })
    }

    fn inject_hook<T: ScopeInjected + Send + Sync + 'static>() -> InjectHook {
        Arc::new(|instance: &Instance, scope: &ScenarioScope| {
            if let Some(typed) = instance.downcast_ref::<T>() {
                typed.inject_from_scope(scope);
            }
        })
    }

    fn register_binding<T: Send + Sync + 'static>(
        &mut self,
        port_type: &'static str,
        factory: impl Fn() -> T + Send + Sync + 'static,
        options: BindingOptions,
        shutdown: Option<ShutdownHook>,
        inject: Option<InjectHook>,
    ) -> Result<(), InjectionError> {
        let qualifier = normalize_qualifier(options.qualifier.as_deref())?;
        let ty = TypeTag::of::<T>();
        let key = (port_type, ty, qualifier.clone());
        if self.bindings.contains_key(&key) {
            return Err(InjectionError::DuplicateBinding(BindingKeyDisplay::new(
                port_type,
                ty.name(),
                qualifier.as_deref(),
            )));
        }
        let erased: Factory = Arc::new(move || Arc::new(factory()) as Instance);
        self.bindings.insert(
            key,
            Binding {
                factory: erased,
                is_async: options.is_async,
                shutdown,
                inject,
            },
        );
        Ok(())
    }

    /// Registers a `kv`-port factory for a marker type that extends the
    /// base KV contract (spec §12). The `KvMarker` bound is the compile-time
    /// replacement for the source registry's runtime `issubclass` check.
    pub fn register_kv<M: KvMarker + 'static>(
        &mut self,
        factory: impl Fn() -> M + Send + Sync + 'static,
        options: BindingOptions,
    ) -> Result<(), InjectionError> {
        self.register_factory::<M>(KV_PORT, factory, options)
    }

    /// Registers a `kv`-port factory for a marker type that is also
    /// `Shutdown`, e.g. a store that must flush or close its backing file
    /// when the scenario ends.
    pub fn register_kv_with_shutdown<M: KvMarker + Shutdown + 'static>(
        &mut self,
        factory: impl Fn() -> M + Send + Sync + 'static,
        options: BindingOptions,
    ) -> Result<(), InjectionError> {
        self.register_factory_with_shutdown::<M>(KV_PORT, factory, options)
    }

    pub fn is_async_binding(
        &self,
        port_type: &'static str,
        ty: TypeTag,
        qualifier: Option<&str>,
    ) -> Result<bool, InjectionError> {
        let qualifier = normalize_qualifier(qualifier)?;
        let key = (port_type, ty, qualifier.clone());
        self.bindings
            .get(&key)
            .map(|b| b.is_async)
            .ok_or_else(|| InjectionError::MissingBinding(BindingKeyDisplay::new(port_type, ty.name(), qualifier.as_deref())))
    }

    /// Builds a fresh [`ScenarioScope`] in two passes (spec §4.7
    /// "instantiate_for_scenario"): every registered factory is invoked
    /// exactly once, then every [`ScopeInjected`] instance resolves its own
    /// dependencies against the now-complete scope — the substitute for the
    /// source's reflective `_apply_scope_injection` field scan.
    pub fn instantiate_for_scenario(&self) -> ScenarioScope {
        let instances = DashMap::new();
        let mut kv_fallbacks: Vec<(Option<String>, Factory, Option<ShutdownHook>)> = Vec::new();
        let mut inject_hooks: Vec<(BindingKey, InjectHook)> = Vec::new();
        for (key, binding) in &self.bindings {
            let instance = (binding.factory)();
            if let Some(inject) = &binding.inject {
                inject_hooks.push((key.clone(), inject.clone()));
            }
            instances.insert(
                key.clone(),
                StoredInstance {
                    instance,
                    shutdown: binding.shutdown.clone(),
                },
            );
            if key.0 == KV_PORT {
                kv_fallbacks.push((key.2.clone(), binding.factory.clone(), binding.shutdown.clone()));
            }
        }
        let scope = ScenarioScope {
            instances,
            kv_fallbacks,
            closed: AtomicBool::new(false),
        };
        for (key, inject) in inject_hooks {
            if let Some(stored) = scope.instances.get(&key) {
                inject(&stored.instance, &scope);
            }
        }
        scope
    }
}

/// Scenario-scoped instances resolved by `(port_type, data_type, qualifier)`
/// (spec §4.7). One per run; closing is idempotent and invokes
/// [`Shutdown::shutdown`] on every instance that was bound with one
/// (spec.md:369 "scope close tears down every instance it created").
pub struct ScenarioScope {
    instances: DashMap<BindingKey, StoredInstance>,
    kv_fallbacks: Vec<(Option<String>, Factory, Option<ShutdownHook>)>,
    closed: AtomicBool,
}

impl ScenarioScope {
    /// Resolves a bound instance, falling back to the base `kv` binding
    /// (exact qualifier, then unqualified) when `port_type == "kv"` and no
    /// exact-type binding exists — the lazy equivalent of the source
    /// registry's eager marker-instance materialization pass.
    pub fn resolve(&self, port_type: &'static str, ty: TypeTag, qualifier: Option<&str>) -> Result<Instance, InjectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(InjectionError::ScopeClosed);
        }
        let qualifier = normalize_qualifier(qualifier)?;
        let key = (port_type, ty, qualifier.clone());
        if let Some(stored) = self.instances.get(&key) {
            return Ok(stored.instance.clone());
        }
        if port_type == KV_PORT {
            if let Some((instance, shutdown)) = self.resolve_kv_fallback(&qualifier) {
                self.instances.insert(key, StoredInstance { instance: instance.clone(), shutdown });
                return Ok(instance);
            }
        }
        Err(InjectionError::MissingBinding(BindingKeyDisplay::new(port_type, ty.name(), qualifier.as_deref())))
    }

    fn resolve_kv_fallback(&self, qualifier: &Option<String>) -> Option<(Instance, Option<ShutdownHook>)> {
        let exact = self
            .kv_fallbacks
            .iter()
            .find(|(q, _, _)| q == qualifier)
            .map(|(_, factory, shutdown)| (factory(), shutdown.clone()));
        if exact.is_some() {
            return exact;
        }
        if qualifier.is_some() {
            return self
                .kv_fallbacks
                .iter()
                .find(|(q, _, _)| q.is_none())
                .map(|(_, factory, shutdown)| (factory(), shutdown.clone()));
        }
        None
    }

    /// Idempotent: closing an already-closed scope is a no-op. The first
    /// call tears down every instance exactly once, in no particular order —
    /// bindings have no declared dependency ordering among themselves
    /// (spec §4.7).
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.instances.iter() {
            let stored = entry.value();
            if let Some(shutdown) = &stored.shutdown {
                shutdown(&stored.instance);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
