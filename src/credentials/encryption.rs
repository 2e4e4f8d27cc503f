//! AES-256-GCM encryption for credential tokens.
//!
//! Each token is encrypted separately with a fresh random nonce and stored as
//! a `{ciphertext, iv, tag}` triple, base64-encoded for the storage layer.
//! The GCM tag binds the nonce and the ciphertext, so a substituted IV is
//! detected, and the AEAD verifies the tag in constant time before releasing
//! any plaintext. The master key is 32 bytes, supplied base64-encoded at
//! process start, and held only in memory.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::EncryptedSecret;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Cipher failures. Deliberately carry no key, plaintext, or ciphertext
/// material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// Master key is not 32 bytes or not valid base64.
    InvalidKey,
    /// A stored field is not valid base64, has the wrong length, or the
    /// recovered plaintext is not UTF-8.
    InvalidSecretFormat,
    /// Integrity verification failed; the secret was modified or the wrong
    /// key was used. No plaintext is released.
    TamperDetected,
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::InvalidKey => {
                write!(f, "encryption key must be {} bytes, base64-encoded", KEY_SIZE)
            }
            CipherError::InvalidSecretFormat => write!(f, "stored secret has invalid format"),
            CipherError::TamperDetected => write!(f, "integrity verification failed"),
        }
    }
}

impl std::error::Error for CipherError {}

/// Decodes and validates the base64-encoded master key.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>, CipherError> {
    let key_bytes = BASE64.decode(key_base64).map_err(|_| CipherError::InvalidKey)?;

    if key_bytes.len() != KEY_SIZE {
        return Err(CipherError::InvalidKey);
    }

    Ok(key_bytes)
}

/// Encrypts a plaintext token with AES-256-GCM under a fresh random nonce.
///
/// The nonce is drawn from the OS CSPRNG on every call and never reused with
/// the same key. The returned triple is immutable; decryption never mutates
/// it.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<EncryptedSecret, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // The aead crate appends the 16-byte tag to the ciphertext; split it off
    // so the triple is explicit in storage.
    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::InvalidSecretFormat)?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

    Ok(EncryptedSecret {
        ciphertext: BASE64.encode(&ciphertext),
        iv: BASE64.encode(nonce),
        tag: BASE64.encode(&tag),
    })
}

/// Decrypts a stored secret, verifying integrity before releasing plaintext.
///
/// Format problems (bad base64, wrong nonce/tag length, non-UTF-8 plaintext)
/// fail with [`CipherError::InvalidSecretFormat`]; any authentication failure
/// fails with [`CipherError::TamperDetected`]. The two are distinct so a
/// tampered secret is never mistaken for a corrupted record.
pub fn decrypt(secret: &EncryptedSecret, key: &[u8]) -> Result<String, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;

    let ciphertext = BASE64
        .decode(&secret.ciphertext)
        .map_err(|_| CipherError::InvalidSecretFormat)?;
    let iv = BASE64.decode(&secret.iv).map_err(|_| CipherError::InvalidSecretFormat)?;
    let tag = BASE64.decode(&secret.tag).map_err(|_| CipherError::InvalidSecretFormat)?;

    if iv.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(CipherError::InvalidSecretFormat);
    }

    let nonce = Nonce::from_slice(&iv);

    // Reassemble ciphertext || tag for the AEAD. The tag comparison inside
    // the AEAD is constant time, and plaintext is only released after it
    // passes.
    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let plaintext_bytes = cipher
        .decrypt(nonce, sealed.as_ref())
        .map_err(|_| CipherError::TamperDetected)?;

    String::from_utf8(plaintext_bytes).map_err(|_| CipherError::InvalidSecretFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn key_validation() {
        // Valid 32-byte key (base64-encoded)
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        // Too short
        let short_key = BASE64.encode([0u8; 16]);
        assert_eq!(validate_key(&short_key), Err(CipherError::InvalidKey));

        // Too long
        let long_key = BASE64.encode([0u8; 64]);
        assert_eq!(validate_key(&long_key), Err(CipherError::InvalidKey));

        // Invalid base64
        assert_eq!(validate_key("not-valid-base64!@#$"), Err(CipherError::InvalidKey));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let plaintext = "my-secret-access-token-12345";

        let secret = encrypt(plaintext, &KEY).expect("encryption failed");
        assert_ne!(secret.ciphertext, plaintext);

        let decrypted = decrypt(&secret, &KEY).expect("decryption failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn fresh_iv_per_call() {
        let plaintext = "same-plaintext";

        let first = encrypt(plaintext, &KEY).unwrap();
        let second = encrypt(plaintext, &KEY).unwrap();

        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);

        assert_eq!(decrypt(&first, &KEY).unwrap(), plaintext);
        assert_eq!(decrypt(&second, &KEY).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_is_tamper() {
        let other_key = [8u8; 32];
        let secret = encrypt("secret", &KEY).unwrap();

        assert_eq!(decrypt(&secret, &other_key), Err(CipherError::TamperDetected));
    }

    /// Flips one bit of a base64-encoded field and re-encodes it.
    fn flip_bit(field: &str, byte_index: usize) -> String {
        let mut bytes = BASE64.decode(field).unwrap();
        bytes[byte_index] ^= 0x01;
        BASE64.encode(&bytes)
    }

    #[test]
    fn bit_flip_in_ciphertext_detected() {
        let secret = encrypt("secret-token", &KEY).unwrap();
        let len = BASE64.decode(&secret.ciphertext).unwrap().len();

        for i in 0..len {
            let tampered = EncryptedSecret {
                ciphertext: flip_bit(&secret.ciphertext, i),
                ..secret.clone()
            };
            assert_eq!(
                decrypt(&tampered, &KEY),
                Err(CipherError::TamperDetected),
                "flip at ciphertext byte {} not detected",
                i
            );
        }
    }

    #[test]
    fn bit_flip_in_iv_detected() {
        let secret = encrypt("secret-token", &KEY).unwrap();

        for i in 0..NONCE_SIZE {
            let tampered = EncryptedSecret {
                iv: flip_bit(&secret.iv, i),
                ..secret.clone()
            };
            assert_eq!(decrypt(&tampered, &KEY), Err(CipherError::TamperDetected));
        }
    }

    #[test]
    fn bit_flip_in_tag_detected() {
        let secret = encrypt("secret-token", &KEY).unwrap();

        for i in 0..TAG_SIZE {
            let tampered = EncryptedSecret {
                tag: flip_bit(&secret.tag, i),
                ..secret.clone()
            };
            assert_eq!(decrypt(&tampered, &KEY), Err(CipherError::TamperDetected));
        }
    }

    #[test]
    fn swapped_iv_between_ciphertexts_detected() {
        let a = encrypt("token-a", &KEY).unwrap();
        let b = encrypt("token-b", &KEY).unwrap();

        let swapped = EncryptedSecret { iv: b.iv, ..a };
        assert_eq!(decrypt(&swapped, &KEY), Err(CipherError::TamperDetected));
    }

    #[test]
    fn malformed_fields_are_format_errors() {
        let secret = encrypt("secret", &KEY).unwrap();

        let bad_b64 = EncryptedSecret {
            ciphertext: "!!not base64!!".to_string(),
            ..secret.clone()
        };
        assert_eq!(decrypt(&bad_b64, &KEY), Err(CipherError::InvalidSecretFormat));

        let short_iv = EncryptedSecret {
            iv: BASE64.encode([0u8; 4]),
            ..secret.clone()
        };
        assert_eq!(decrypt(&short_iv, &KEY), Err(CipherError::InvalidSecretFormat));

        let short_tag = EncryptedSecret {
            tag: BASE64.encode([0u8; 8]),
            ..secret
        };
        assert_eq!(decrypt(&short_tag, &KEY), Err(CipherError::InvalidSecretFormat));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let secret = encrypt("", &KEY).unwrap();
        assert_eq!(decrypt(&secret, &KEY).unwrap(), "");
    }
}
