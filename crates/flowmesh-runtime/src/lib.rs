//! `flowmesh-runtime`: `RuntimeBuilder`, `BootstrapSupervisor`,
//! `ChildBootstrap`, and the runtime configuration model — the host-process
//! composition layer on top of `flowmesh-core`'s execution kernel and
//! `flowmesh-transport-tcp`'s wire transport (spec §4.10, §4.11, §4.13).

pub mod adapter;
pub mod builder;
pub mod bundle;
pub mod child;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod routecache;
pub mod supervisor;
