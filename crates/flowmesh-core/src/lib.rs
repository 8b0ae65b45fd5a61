//! `flowmesh-core`: contract-based DAG construction, the consumer-registry
//! router, per-trace context, dependency injection scopes, the
//! single-threaded `SyncRunner` drain loop, and reply correlation.
//!
//! This crate has no knowledge of processes, sockets, or config file
//! formats — those live in `flowmesh-transport-tcp` and `flowmesh-runtime`,
//! which depend on this crate rather than the other way around.

pub mod contract;
pub mod context;
pub mod dag;
pub mod envelope;
pub mod error;
pub mod injection;
pub mod observability;
pub mod registry;
pub mod reply;
pub mod router;
pub mod runner;
