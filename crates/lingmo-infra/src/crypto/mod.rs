//! Cryptographic helpers: the credential vault and API key comparison.

pub mod vault;

use sha2::{Digest, Sha256};

/// Compare two secrets by digest so the comparison time does not depend on
/// where the inputs first differ.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_match_exact_only() {
        assert!(secrets_match("sk-gateway", "sk-gateway"));
        assert!(!secrets_match("sk-gateway", "sk-gatewaY"));
        assert!(!secrets_match("", "sk-gateway"));
    }
}
