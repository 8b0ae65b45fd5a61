//! The wire envelope shape (spec §4.8, §6 "Wire format").
//!
//! Field types are exactly as spec §4.8 lists them. `target` is `str | list
//! <str> | null` in the source's untyped wire format; [`WireTarget`] is the
//! Rust-typed stand-in, `#[serde(untagged)]` so the JSON shape round-trips
//! unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `target (str|list<str>|null)` from spec §4.8.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTarget {
    Single(String),
    Many(Vec<String>),
}

/// One frame on the wire (spec §4.8). `headers` is a `BTreeMap` rather than
/// a `HashMap` so its keys serialize in sorted order without a separate
/// canonicalization pass over nested maps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<WireTarget>,
    pub payload_b64: String,
    pub headers: BTreeMap<String, String>,
    pub ts: u64,
    pub nonce: String,
    pub sig: String,
}

impl WireEnvelope {
    /// Returns a clone with `sig` cleared, ready for canonicalization and
    /// signing (spec §4.8 "serialize the envelope with sig="" as canonical
    /// JSON").
    pub fn with_empty_sig(&self) -> Self {
        let mut copy = self.clone();
        copy.sig = String::new();
        copy
    }
}
