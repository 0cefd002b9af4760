#![forbid(unsafe_code)]

//! # Anchor Crypto
//!
//! Ed25519 signing/verification and Blake3 hashing with the wire encodings
//! used across the anchors protocol: public keys travel as base58, secret
//! keys and signatures as base64, and every signed payload is a canonical
//! colon-joined string.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

/// The 64-hex-char seed used as `prevHash` for the first block of every
/// chain and as the base input of the genesis epoch hash.
pub const ZERO_HASH: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// Errors produced while decoding key material from its wire form.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The base58 public key string could not be decoded.
    #[error("invalid base58 public key: {0}")]
    InvalidPublicKey(String),
    /// The base64 secret key string could not be decoded.
    #[error("invalid base64 secret key: {0}")]
    InvalidSecretKey(String),
    /// The decoded secret key does not correspond to the declared public key.
    #[error("secret key does not match public key {0}")]
    KeyMismatch(String),
}

/// Blake3-256 of a canonical string, hex-encoded.
pub fn hash_blake3(data: &str) -> String {
    blake3::hash(data.as_bytes()).to_hex().to_string()
}

/// An Ed25519 keypair decoded from the node configuration.
///
/// The secret is accepted either as a 32-byte seed or as a 64-byte
/// seed-plus-public concatenation; in both forms it must derive the declared
/// base58 public key, so a configuration typo fails at startup rather than
/// producing signatures nobody accepts.
pub struct KeyPair {
    signing: SigningKey,
    public_b58: String,
}

impl KeyPair {
    /// Decodes a keypair from its configuration encoding.
    pub fn from_encoded(public_b58: &str, secret_b64: &str) -> Result<Self, CryptoError> {
        let secret_bytes = BASE64
            .decode(secret_b64)
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;

        let seed: [u8; 32] = match secret_bytes.len() {
            32 => secret_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidSecretKey("bad length".into()))?,
            64 => secret_bytes[..32]
                .try_into()
                .map_err(|_| CryptoError::InvalidSecretKey("bad length".into()))?,
            other => {
                return Err(CryptoError::InvalidSecretKey(format!(
                    "expected 32 or 64 bytes, got {other}"
                )))
            }
        };

        let signing = SigningKey::from_bytes(&seed);
        let derived_b58 = bs58::encode(signing.verifying_key().as_bytes()).into_string();
        if derived_b58 != public_b58 {
            return Err(CryptoError::KeyMismatch(public_b58.to_string()));
        }

        Ok(Self {
            signing,
            public_b58: derived_b58,
        })
    }

    /// Builds a keypair from a raw seed. Used by tests and key tooling.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let public_b58 = bs58::encode(signing.verifying_key().as_bytes()).into_string();
        Self {
            signing,
            public_b58,
        }
    }

    /// The base58-encoded public key, as it appears in registries and blocks.
    pub fn public_key(&self) -> &str {
        &self.public_b58
    }

    /// Signs a canonical payload string, returning the base64 signature.
    pub fn sign(&self, message: &str) -> String {
        let sig = self.signing.sign(message.as_bytes());
        BASE64.encode(sig.to_bytes())
    }
}

/// Verifies a base64 signature over a canonical payload string against a
/// base58 public key. Any decode failure counts as an invalid signature.
pub fn verify_signature(message: &str, public_b58: &str, signature_b64: &str) -> bool {
    let Ok(pk_bytes) = bs58::decode(public_b58).into_vec() else {
        return false;
    };
    let Ok(pk_arr) = <[u8; 32]>::try_from(pk_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&pk_arr) else {
        return false;
    };
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_arr);
    verifying.verify(message.as_bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_keypair() -> KeyPair {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        KeyPair::from_seed(seed)
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = random_keypair();
        let payload = "prevHash:0:abc:def#0";
        let sig = kp.sign(payload);
        assert!(verify_signature(payload, kp.public_key(), &sig));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let kp = random_keypair();
        let sig = kp.sign("payload-a");
        assert!(!verify_signature("payload-b", kp.public_key(), &sig));
    }

    #[test]
    fn foreign_signer_is_rejected() {
        let kp = random_keypair();
        let other = random_keypair();
        let sig = kp.sign("payload");
        assert!(!verify_signature("payload", other.public_key(), &sig));
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        let kp = random_keypair();
        let sig = kp.sign("payload");
        assert!(!verify_signature("payload", "not-base58-0OIl", &sig));
        assert!(!verify_signature("payload", kp.public_key(), "!!not-base64!!"));
        assert!(!verify_signature("payload", kp.public_key(), "c2hvcnQ="));
    }

    #[test]
    fn keypair_decoding_checks_public_key() {
        let kp = random_keypair();
        let seed_b64 = {
            use base64::Engine as _;
            let mut seed = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut seed);
            BASE64.encode(seed)
        };
        // A random seed will not derive this keypair's public key.
        assert!(matches!(
            KeyPair::from_encoded(kp.public_key(), &seed_b64),
            Err(CryptoError::KeyMismatch(_))
        ));
    }

    #[test]
    fn blake3_matches_known_vector() {
        assert_eq!(
            hash_blake3(""),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
        assert_eq!(hash_blake3("abc").len(), 64);
        assert_ne!(hash_blake3("abc"), hash_blake3("abd"));
    }

    #[test]
    fn zero_hash_shape() {
        assert_eq!(ZERO_HASH.len(), 64);
        assert!(ZERO_HASH.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
