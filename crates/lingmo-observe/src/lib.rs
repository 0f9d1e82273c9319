//! Observability setup for Lingmo.

pub mod tracing_setup;
