//! # Meshwork Crypto
//!
//! The AES-128-EAX envelope that wraps every HTTP body on the overlay.
//!
//! On the wire a request (and its response) looks like:
//!
//! - body: base64 of the EAX ciphertext of the JSON payload
//! - `Nonce` header: base64 of the 16-byte random nonce
//! - `Tag` header: base64 of the 16-byte authentication tag
//!
//! The shared key is the first 16 bytes of the base64-decoded *secret
//! digest*, where the digest is `base64(SHA-256(passphrase))`. Tag
//! verification happens before any plaintext leaves [`open`]; a bad
//! tag, nonce, or base64 yields an [`EnvelopeError`] and nothing else.

use aes::Aes128;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use eax::Eax;
use eax::aead::generic_array::GenericArray;
use eax::aead::{AeadInPlace, KeyInit};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes128Eax = Eax<Aes128>;

pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 16;

/// Envelope failures. Deliberately coarse: callers log and return
/// HTTP 500 without distinguishing attacker-visible detail.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{field} must be {expected} bytes, got {actual}")]
    Length {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("tag verification failed")]
    Verification,
}

/// The 128-bit envelope key, derived from the shared secret digest.
#[derive(Clone)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Derive the key from a secret digest: the first 16 bytes of the
    /// base64-decoded digest.
    pub fn from_digest(digest_b64: &str) -> Result<SecretKey, EnvelopeError> {
        let decoded = BASE64.decode(digest_b64)?;
        if decoded.len() < KEY_LEN {
            return Err(EnvelopeError::Length {
                field: "secret digest",
                expected: KEY_LEN,
                actual: decoded.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded[..KEY_LEN]);
        Ok(SecretKey(key))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// `base64(SHA-256(passphrase))` — the stored form of the shared
/// secret. Both ends derive the same envelope key from it.
pub fn secret_digest(passphrase: &str) -> String {
    BASE64.encode(Sha256::digest(passphrase.as_bytes()))
}

/// A sealed payload ready to put on the wire.
#[derive(Debug, Clone)]
pub struct Sealed {
    /// base64 ciphertext — the HTTP body.
    pub body: String,
    /// base64 nonce — the `Nonce` header.
    pub nonce: String,
    /// base64 tag — the `Tag` header.
    pub tag: String,
}

/// Encrypt `plaintext` under a fresh random nonce.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Sealed {
    let cipher = Aes128Eax::new(GenericArray::from_slice(&key.0));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buffer)
        .expect("EAX encryption is infallible for in-memory buffers");

    Sealed {
        body: BASE64.encode(&buffer),
        nonce: BASE64.encode(nonce),
        tag: BASE64.encode(tag),
    }
}

/// Verify and decrypt an envelope. The tag is checked before any
/// plaintext is returned.
pub fn open(
    key: &SecretKey,
    body_b64: &[u8],
    nonce_b64: &str,
    tag_b64: &str,
) -> Result<Vec<u8>, EnvelopeError> {
    let mut buffer = BASE64.decode(body_b64)?;
    let nonce = decode_exact(nonce_b64, "nonce", NONCE_LEN)?;
    let tag = decode_exact(tag_b64, "tag", TAG_LEN)?;

    let cipher = Aes128Eax::new(GenericArray::from_slice(&key.0));
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&nonce),
            b"",
            &mut buffer,
            GenericArray::from_slice(&tag),
        )
        .map_err(|_| EnvelopeError::Verification)?;

    Ok(buffer)
}

fn decode_exact(
    value_b64: &str,
    field: &'static str,
    expected: usize,
) -> Result<Vec<u8>, EnvelopeError> {
    let decoded = BASE64.decode(value_b64)?;
    if decoded.len() != expected {
        return Err(EnvelopeError::Length {
            field,
            expected,
            actual: decoded.len(),
        });
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_digest(&secret_digest("changeme")).unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let key = key();
        let sealed = seal(&key, b"{\"type\":\"PING\"}");
        let plain = open(&key, sealed.body.as_bytes(), &sealed.nonce, &sealed.tag).unwrap();
        assert_eq!(plain, b"{\"type\":\"PING\"}");
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let key = key();
        let a = seal(&key, b"same payload");
        let b = seal(&key, b"same payload");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.body, b.body);
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let key = key();
        let sealed = seal(&key, b"payload");
        let wrong_tag = BASE64.encode([0u8; TAG_LEN]);
        let result = open(&key, sealed.body.as_bytes(), &sealed.nonce, &wrong_tag);
        assert!(matches!(result, Err(EnvelopeError::Verification)));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let key = key();
        let sealed = seal(&key, b"payload");
        let mut raw = BASE64.decode(&sealed.body).unwrap();
        raw[0] ^= 0xff;
        let result = open(&key, BASE64.encode(raw).as_bytes(), &sealed.nonce, &sealed.tag);
        assert!(matches!(result, Err(EnvelopeError::Verification)));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = seal(&key(), b"payload");
        let other = SecretKey::from_digest(&secret_digest("not-changeme")).unwrap();
        let result = open(&other, sealed.body.as_bytes(), &sealed.nonce, &sealed.tag);
        assert!(matches!(result, Err(EnvelopeError::Verification)));
    }

    #[test]
    fn truncated_nonce_is_rejected() {
        let key = key();
        let sealed = seal(&key, b"payload");
        let short = BASE64.encode([0u8; 8]);
        let result = open(&key, sealed.body.as_bytes(), &short, &sealed.tag);
        assert!(matches!(result, Err(EnvelopeError::Length { field: "nonce", .. })));
    }

    #[test]
    fn garbage_base64_is_rejected() {
        let key = key();
        let sealed = seal(&key, b"payload");
        let result = open(&key, b"!!! not base64 !!!", &sealed.nonce, &sealed.tag);
        assert!(matches!(result, Err(EnvelopeError::Base64(_))));
    }

    #[test]
    fn digest_is_deterministic_and_key_sized() {
        assert_eq!(secret_digest("changeme"), secret_digest("changeme"));
        // SHA-256 digest decodes to 32 bytes, plenty for the 16-byte key
        assert!(SecretKey::from_digest(&secret_digest("x")).is_ok());
    }
}
