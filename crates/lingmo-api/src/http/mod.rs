//! HTTP layer: the OpenAI-compatible endpoint and the management API.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;

#[cfg(test)]
pub(crate) mod test_support;
