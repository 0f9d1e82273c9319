//! Infrastructure layer for Lingmo.
//!
//! Implements the ports defined in `lingmo-core`: SQLite repositories, the
//! reqwest vendor transport and usage reporter, the AES-256-GCM credential
//! vault, the `config.toml` loader and the audit writer task.

pub mod audit_writer;
pub mod config;
pub mod crypto;
pub mod http;
pub mod sqlite;
