//! Deterministic token estimate for vendors that omit usage.

use lingmo_types::chat::{ChatCompletionRequest, Usage};

/// `max(ceil(bytes / 4), whitespace-separated words)`.
pub fn estimate_text_tokens(text: &str) -> u64 {
    let by_bytes = (text.len() as u64).div_ceil(4);
    let by_words = text.split_whitespace().count() as u64;
    by_bytes.max(by_words)
}

/// Estimated prompt tokens over every message in the request.
pub fn estimate_prompt_tokens(request: &ChatCompletionRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|m| estimate_text_tokens(&m.content))
        .sum()
}

/// Usage estimate for a request and the completion text it produced.
pub fn estimate_usage(request: &ChatCompletionRequest, completion: &str) -> Usage {
    Usage::new(estimate_prompt_tokens(request), estimate_text_tokens(completion))
}
