//! Outbound vendor HTTP: the reqwest [`Transport`](lingmo_core::transport::Transport)
//! and the usage API reporter.

pub mod transport;
pub mod usage;

#[cfg(test)]
pub(crate) mod stub;

/// Shared client for vendor traffic. Per-call deadlines are enforced by the
/// caller, so only the connect phase is bounded here.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .user_agent(concat!("lingmo/", env!("CARGO_PKG_VERSION")))
        .build()
}
