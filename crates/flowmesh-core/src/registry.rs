//! `ConsumerRegistry` (spec §4.4): a map of type → ordered consumer names,
//! keyed by [`TypeTag`] instead of a Python runtime type.

use std::collections::HashMap;

use crate::contract::TypeTag;

/// Map from payload type to the ordered list of consumer node names.
///
/// `register` *replaces* the list for that type, matching the original's
/// "appenders call `get_consumers` then `register` with the merged list"
/// convention — there is deliberately no separate append API.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<TypeTag, Vec<String>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ty: TypeTag, names: Vec<String>) {
        self.consumers.insert(ty, names);
    }

    pub fn get_consumers(&self, ty: TypeTag) -> &[String] {
        self.consumers.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append `name` to the existing consumer list for `ty`, preserving
    /// discovery order and skipping an exact duplicate registration.
    pub fn append(&mut self, ty: TypeTag, name: impl Into<String>) {
        let name = name.into();
        let mut merged = self.get_consumers(ty).to_vec();
        if !merged.iter().any(|existing| existing == &name) {
            merged.push(name);
        }
        self.register(ty, merged);
    }
}
