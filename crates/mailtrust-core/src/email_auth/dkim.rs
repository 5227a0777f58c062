//! DKIM key generation
//!
//! Produces RSA key pairs for sending domains. Both halves are returned as
//! base64 DER text: the public key as SPKI for the `p=` tag, the private key
//! as PKCS#8 for encrypted storage. Nothing here persists keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mailtrust_common::{Error, Result};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

/// Default modulus size for new DKIM keys
pub const DEFAULT_KEY_BITS: usize = 2048;

const MIN_KEY_BITS: usize = 1024;
const MAX_KEY_BITS: usize = 4096;

/// Generated DKIM key pair
#[derive(Clone)]
pub struct DkimKeyPair {
    /// Base64 SPKI DER, ready for the DNS `p=` tag
    pub public_key: String,
    /// Base64 PKCS#8 DER; encrypt before persisting
    pub private_key: String,
}

impl std::fmt::Debug for DkimKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkimKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// RSA key pair generator for DKIM
#[derive(Debug, Clone, Copy)]
pub struct DkimKeyGenerator {
    bits: usize,
}

impl Default for DkimKeyGenerator {
    fn default() -> Self {
        Self {
            bits: DEFAULT_KEY_BITS,
        }
    }
}

impl DkimKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator for a specific modulus size (1024 to 4096 bits)
    pub fn with_bits(bits: usize) -> Result<Self> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
            return Err(Error::Validation(format!(
                "DKIM key size must be between {} and {} bits, got {}",
                MIN_KEY_BITS, MAX_KEY_BITS, bits
            )));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Generate a key pair on the blocking pool
    pub async fn generate(&self) -> Result<DkimKeyPair> {
        let bits = self.bits;
        tokio::task::spawn_blocking(move || generate_key_pair(bits))
            .await
            .map_err(|e| Error::Internal(format!("Key generation task failed: {}", e)))?
    }

    /// Strip all whitespace so the key matches the published TXT value byte for byte
    pub fn format_for_dns(public_key: &str) -> String {
        public_key.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Full TXT value for `<selector>._domainkey.<domain>`
    pub fn dns_record_value(public_key: &str) -> String {
        format!("v=DKIM1; k=rsa; p={}", Self::format_for_dns(public_key))
    }

    /// Decode a stored public key (SPKI DER, falling back to PKCS#1 DER)
    pub fn decode_public_key(public_key: &str) -> Result<RsaPublicKey> {
        let der = BASE64
            .decode(Self::format_for_dns(public_key))
            .map_err(|e| Error::Crypto(format!("Failed to decode DKIM public key: {}", e)))?;

        if let Ok(key) = RsaPublicKey::from_public_key_der(&der) {
            return Ok(key);
        }

        RsaPublicKey::from_pkcs1_der(&der)
            .map_err(|e| Error::Crypto(format!("Failed to parse DKIM public key: {}", e)))
    }

    /// Decode a decrypted private key (PKCS#8 DER)
    pub fn decode_private_key(private_key: &str) -> Result<RsaPrivateKey> {
        let der = BASE64
            .decode(Self::format_for_dns(private_key))
            .map_err(|e| Error::Crypto(format!("Failed to decode DKIM private key: {}", e)))?;

        RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|e| Error::Crypto(format!("Failed to parse DKIM private key: {}", e)))
    }
}

fn generate_key_pair(bits: usize) -> Result<DkimKeyPair> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| Error::Crypto(format!("Failed to generate RSA key: {}", e)))?;
    let public_key = private_key.to_public_key();

    let public_der = public_key
        .to_public_key_der()
        .map_err(|e| Error::Crypto(format!("Failed to encode public key: {}", e)))?;
    let private_der = private_key
        .to_pkcs8_der()
        .map_err(|e| Error::Crypto(format!("Failed to encode private key: {}", e)))?;

    debug!(bits = public_key.size() * 8, "Generated DKIM key pair");

    Ok(DkimKeyPair {
        public_key: BASE64.encode(public_der.as_bytes()),
        private_key: BASE64.encode(private_der.as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_generated_keys_decode() {
        let generator = DkimKeyGenerator::with_bits(1024).unwrap();
        let pair = generator.generate().await.unwrap();

        let public = DkimKeyGenerator::decode_public_key(&pair.public_key).unwrap();
        let private = DkimKeyGenerator::decode_private_key(&pair.private_key).unwrap();

        assert_eq!(public.size() * 8, 1024);
        assert_eq!(private.to_public_key(), public);
        assert!(!pair.public_key.contains(char::is_whitespace));
    }

    #[test]
    fn test_default_is_2048_bits() {
        assert_eq!(DkimKeyGenerator::new().bits(), 2048);
        assert!(DkimKeyGenerator::with_bits(512).is_err());
        assert!(DkimKeyGenerator::with_bits(8192).is_err());
    }

    #[test]
    fn test_format_for_dns_strips_whitespace() {
        assert_eq!(
            DkimKeyGenerator::format_for_dns(" MIIB\n  IjAN\tBgkq "),
            "MIIBIjANBgkq"
        );
        assert_eq!(
            DkimKeyGenerator::dns_record_value("AB CD"),
            "v=DKIM1; k=rsa; p=ABCD"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = DkimKeyGenerator::decode_public_key("not-a-key").unwrap_err();
        assert_eq!(err.code(), "CRYPTO_ERROR");
        assert!(DkimKeyGenerator::decode_private_key("AAAA").is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = DkimKeyPair {
            public_key: "pub".to_string(),
            private_key: "very-secret".to_string(),
        };
        assert!(!format!("{:?}", pair).contains("very-secret"));
    }
}
