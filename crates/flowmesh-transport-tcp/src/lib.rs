//! `flowmesh-transport-tcp`: the localhost secure transport and the
//! three-phase control plane built on top of it (spec §4.8, §4.9).
//!
//! Nothing here knows about process spawning or node discovery — those
//! concerns live in `flowmesh-runtime`, which uses this crate to ship
//! envelopes and control messages across a process boundary.

pub mod control;
pub mod error;
pub mod keybundle;
pub mod secret;
pub mod transport;
pub mod wire;
