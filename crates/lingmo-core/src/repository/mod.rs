//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (lingmo-infra) implements. The core crate never depends on any specific
//! storage technology.

pub mod audit;
pub mod config;
pub mod model;
pub mod quota;
