//! Credential vault
//!
//! AES-GCM encryption for provider secrets and DKIM private keys. The stored
//! form is `base64(nonce || ciphertext || tag)` with a fresh 96-bit nonce per
//! call. The key size (16, 24 or 32 bytes) selects AES-128, AES-192 or AES-256.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mailtrust_common::config::{Environment, SecurityConfig};
use mailtrust_common::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Marks base64 key material; anything else is taken as raw bytes
const BASE64_KEY_PREFIX: &str = "base64:";

/// Fixed key for non-production profiles only
const INSECURE_DEVELOPMENT_KEY: &[u8; 32] = b"mailtrust-insecure-dev-key-00000";

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = || Error::Config("Invalid encryption key".to_string());
        match key.len() {
            16 => Ok(Cipher::Aes128(
                Aes128Gcm::new_from_slice(key).map_err(|_| invalid())?,
            )),
            24 => Ok(Cipher::Aes192(
                Aes192Gcm::new_from_slice(key).map_err(|_| invalid())?,
            )),
            32 => Ok(Cipher::Aes256(
                Aes256Gcm::new_from_slice(key).map_err(|_| invalid())?,
            )),
            n => Err(Error::Config(format!(
                "Encryption key must be 16, 24 or 32 bytes, got {}",
                n
            ))),
        }
    }

    fn encrypt(&self, nonce: &Nonce<U12>, plaintext: &[u8]) -> aes_gcm::aead::Result<Vec<u8>> {
        match self {
            Cipher::Aes128(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes192(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes256(c) => c.encrypt(nonce, plaintext),
        }
    }

    fn decrypt(&self, nonce: &Nonce<U12>, ciphertext: &[u8]) -> aes_gcm::aead::Result<Vec<u8>> {
        match self {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes192(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Cipher::Aes128(_) => "AES-128-GCM",
            Cipher::Aes192(_) => "AES-192-GCM",
            Cipher::Aes256(_) => "AES-256-GCM",
        }
    }
}

/// Process-wide secret encryption, immutable after startup
pub struct CredentialVault {
    cipher: Cipher,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("key", &"[REDACTED]")
            .field("algorithm", &self.cipher.name())
            .finish()
    }
}

impl CredentialVault {
    /// Create a vault from raw key material
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            cipher: Cipher::new(key)?,
        })
    }

    /// Parse configured key material: `base64:<encoded>` or the raw bytes of the string
    pub fn from_encoded_key(key: &str) -> Result<Self> {
        let key = key.trim();
        match key.strip_prefix(BASE64_KEY_PREFIX) {
            Some(encoded) => {
                let decoded = BASE64
                    .decode(encoded.trim())
                    .map_err(|e| Error::Config(format!("Invalid base64 encryption key: {}", e)))?;
                Self::new(&decoded)
            }
            None => Self::new(key.as_bytes()),
        }
    }

    /// Build the vault from configuration. A missing key is fatal in production.
    pub fn from_config(security: &SecurityConfig, environment: Environment) -> Result<Self> {
        match security.encryption_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Self::from_encoded_key(key),
            _ if environment.is_production() => Err(Error::Config(
                "security.encryption_key is required in production".to_string(),
            )),
            _ => Ok(Self::insecure_development()),
        }
    }

    /// Vault with a well-known key. Never use outside development and tests.
    pub fn insecure_development() -> Self {
        warn!("Using the insecure development encryption key; secrets are NOT protected");
        Self {
            cipher: Cipher::Aes256(Aes256Gcm::new(INSECURE_DEVELOPMENT_KEY.into())),
        }
    }

    /// Generate random key material of the given size in the `base64:` configuration form
    pub fn generate_key(len: usize) -> Result<String> {
        if !matches!(len, 16 | 24 | 32) {
            return Err(Error::Validation(format!("Unsupported key size: {}", len)));
        }
        let mut key = vec![0u8; len];
        OsRng.fill_bytes(&mut key);
        Ok(format!("{}{}", BASE64_KEY_PREFIX, BASE64.encode(key)))
    }

    /// Encrypt a secret. Empty input is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| Error::Crypto("Encryption failed".to_string()))?;

        let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(packed))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt). Empty input is returned unchanged.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let packed = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::Crypto(format!("Invalid ciphertext encoding: {}", e)))?;

        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Crypto("Ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = packed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                Error::Crypto("Decryption failed: authentication tag mismatch".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("Decrypted value is not valid UTF-8".to_string()))
    }

    /// Heuristic: decodes as base64 and is long enough to hold a nonce and tag.
    /// Plausible-looking foreign data can pass; real ciphertext always does.
    pub fn is_encrypted(value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        BASE64
            .decode(value.trim())
            .map(|bytes| bytes.len() >= NONCE_LEN + TAG_LEN)
            .unwrap_or(false)
    }
}
