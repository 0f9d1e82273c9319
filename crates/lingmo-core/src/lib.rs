//! Routing core of the Lingmo gateway.
//!
//! Model registry, protocol adapters, quota tracker, circuit state, router,
//! forwarder and quota synchronizer. This crate defines the ports
//! (`Transport`, `UsageReporter`, repository traits) that `lingmo-infra`
//! implements. It never depends on a database or HTTP client crate.

pub mod adapter;
pub mod audit;
pub mod circuit;
pub mod forwarder;
pub mod gateway;
pub mod quota;
pub mod registry;
pub mod repository;
pub mod router;
pub mod service;
pub mod settings;
pub mod synchronizer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
