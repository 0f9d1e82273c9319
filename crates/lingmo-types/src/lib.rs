//! Shared domain types for the Lingmo gateway.
//!
//! Canonical chat shapes, provider endpoints, quota and audit records,
//! runtime settings and the error taxonomy. No I/O lives here -- only serde,
//! uuid, chrono, secrecy and thiserror.

pub mod audit;
pub mod chat;
pub mod config;
pub mod error;
pub mod model;
pub mod quota;
pub mod status;
