//! AES-256-GCM vault encryption for endpoint credentials at rest.
//!
//! The master key is 32 random bytes stored hex-encoded in
//! `{data_dir}/vault.key`, generated on first start.
//!
//! Encrypted format: `nonce (12 bytes) || ciphertext`
//!
//! SECURITY: Error types never contain plaintext or key material.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Errors from vault operations.
///
/// Display/Debug output never includes plaintext, key material or ciphertext.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,

    #[error("vault key file error: {0}")]
    KeyFile(String),
}

/// AES-256-GCM cipher for credentials.
///
/// Every call to [`encrypt`](Self::encrypt) uses a fresh random nonce, so
/// the same plaintext never encrypts to the same bytes twice.
#[derive(Clone)]
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Load the master key from `path`, generating and writing a new one when
    /// the file does not exist.
    pub fn from_key_file(path: &Path) -> Result<Self, VaultError> {
        match std::fs::read_to_string(path) {
            Ok(hex_key) => {
                let bytes = hex_decode(hex_key.trim())
                    .map_err(|_| VaultError::KeyFile("corrupted key file".to_string()))?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| VaultError::KeyFile("invalid key length".to_string()))?;
                Ok(Self::new(&key))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let key = rand_bytes();
                write_key_file(path, &hex_encode(&key))?;
                tracing::info!(path = %path.display(), "generated new vault key");
                Ok(Self::new(&key))
            }
            Err(err) => Err(VaultError::KeyFile(err.to_string())),
        }
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }

    pub fn decrypt_string(&self, data: &[u8]) -> Result<String, VaultError> {
        String::from_utf8(self.decrypt(data)?).map_err(|_| VaultError::InvalidUtf8)
    }
}

impl std::fmt::Debug for VaultCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultCrypto(<redacted>)")
    }
}

fn write_key_file(path: &Path, hex_key: &str) -> Result<(), VaultError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VaultError::KeyFile(e.to_string()))?;
    }
    std::fs::write(path, hex_key).map_err(|e| VaultError::KeyFile(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| VaultError::KeyFile(e.to_string()))?;
    }
    Ok(())
}

/// 32 random bytes from the OS CSPRNG.
fn rand_bytes() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err("malformed hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| format!("invalid hex at position {i}: {e}"))
        })
        .collect()
}
