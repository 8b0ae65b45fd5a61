//! Node and adapter contracts: the `consumes`/`emits` declarations the
//! [`crate::dag`] builder indexes to derive the graph.
//!
//! The source system keys its consumer registry and DAG by Python runtime
//! types. Rust has no runtime type registry of its own, so per the spec's
//! Design Notes §9 ("Runtime type-keyed containers") this crate keys on a
//! deterministic type identifier instead: [`TypeTag`] pairs a [`TypeId`]
//! (for exact, allocation-free equality) with the type's `type_name` (for
//! diagnostics). Call sites build one with [`TypeTag::of::<T>()`].

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Type-erased payload moving through the graph.
///
/// `Arc`, not `Box`: default fan-out delivers the same payload to every
/// registered consumer (spec §4.3), so the payload must be cheaply shareable
/// rather than owned by a single recipient.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A deterministic, displayable stand-in for "the Rust type `T`".
///
/// Equality and ordering are by [`TypeId`]; the `name` field exists purely
/// for logs and error messages and never participates in comparisons.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for TypeTag {}

impl std::hash::Hash for TypeTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TypeTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Downcast a [`Payload`] back to its concrete type, or hand it back unchanged.
pub fn downcast<T: Send + Sync + 'static>(payload: Payload) -> Result<Arc<T>, Payload> {
    payload.downcast::<T>()
}

/// The `TypeId` half of a [`TypeTag`] for a payload whose concrete type is
/// only known at runtime — the Rust analogue of looking a value's type up
/// in the consumer registry the way the source kernel uses `type(payload)`.
pub fn type_tag_of_payload(payload: &Payload) -> TypeTag {
    TypeTag {
        id: (**payload).type_id(),
        name: "<dynamic>",
    }
}

/// `{ name, consumes, emits, external }` from spec §3 / §4.1.
///
/// `external` contracts participate in DAG validation as adapter endpoints
/// but are never invoked by [`crate::runner::SyncRunner`].
#[derive(Clone, Debug)]
pub struct NodeContract {
    pub name: String,
    pub consumes: Vec<TypeTag>,
    pub emits: Vec<TypeTag>,
    pub external: bool,
}

impl NodeContract {
    pub fn node(name: impl Into<String>, consumes: Vec<TypeTag>, emits: Vec<TypeTag>) -> Self {
        Self {
            name: name.into(),
            consumes,
            emits,
            external: false,
        }
    }

    pub fn external(name: impl Into<String>, consumes: Vec<TypeTag>, emits: Vec<TypeTag>) -> Self {
        Self {
            name: name.into(),
            consumes,
            emits,
            external: true,
        }
    }

    /// An external sink: consumes something, emits nothing, and is allowed
    /// to have no in-graph producer (spec §4.1 step 3).
    pub(crate) fn is_external_sink(&self) -> bool {
        self.external && !self.consumes.is_empty() && self.emits.is_empty()
    }
}

/// Build a [`TypeTag`] list from a type list, e.g. `types![A, B]`.
#[macro_export]
macro_rules! types {
    ($($t:ty),* $(,)?) => {
        vec![$($crate::contract::TypeTag::of::<$t>()),*]
    };
}
