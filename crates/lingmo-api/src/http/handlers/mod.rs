//! HTTP request handlers.

pub mod chat;
pub mod config;
pub mod history;
pub mod models;
pub mod quota;
pub mod routing;
