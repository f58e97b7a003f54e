//! Secret encryption module using AES-256-CBC
//!
//! This module provides encryption and decryption utilities for the access and
//! refresh secrets stored in the database. The at-rest format is
//! `base64(IV || AES-256-CBC(plaintext))` with PKCS#7 padding and a fresh
//! random 16-byte IV per call, so identical plaintext never produces the same
//! ciphertext twice. The 32-byte key is supplied out of band as base64.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from raw bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Decode a key from its out-of-band base64 representation
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Self::new(bytes)
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt a secret, producing the base64 `IV || ciphertext` format
pub fn encrypt_secret(key: &CryptoKey, plaintext: &str) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut raw = Vec::with_capacity(IV_LEN + ciphertext.len());
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(raw))
}

/// Decrypt a secret previously produced by [`encrypt_secret`]
pub fn decrypt_secret(key: &CryptoKey, encoded: &str) -> Result<String, CryptoError> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|_| CryptoError::InvalidFormat)?;

    // Must hold the IV plus at least one whole cipher block
    if raw.len() < IV_LEN + BLOCK_LEN || (raw.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidFormat);
    }

    let (iv, ciphertext) = raw.split_at(IV_LEN);
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("bad padding".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = "ya29.a0AfB_secret-access-token";

        let encrypted = encrypt_secret(&key, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_secret(&key, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_repeated_encryption_differs() {
        let key = test_key();
        let plaintext = "same secret";

        let first = encrypt_secret(&key, plaintext).expect("encryption succeeds");
        let second = encrypt_secret(&key, plaintext).expect("encryption succeeds");

        // Fresh IV per call: ciphertexts differ but both round-trip
        assert_ne!(first, second);
        assert_eq!(decrypt_secret(&key, &first).unwrap(), plaintext);
        assert_eq!(decrypt_secret(&key, &second).unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext_works() {
        let key = test_key();
        let encrypted = encrypt_secret(&key, "").expect("encryption succeeds");
        let decrypted = decrypt_secret(&key, &encrypted).expect("decryption succeeds");
        assert_eq!(decrypted, "");
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let other = CryptoKey::new(vec![8u8; 32]).expect("valid key");
        let encrypted = encrypt_secret(&key, "secret").expect("encryption succeeds");

        // Wrong key must never silently yield a substitute plaintext
        match decrypt_secret(&other, &encrypted) {
            Err(_) => {}
            Ok(plaintext) => assert_ne!(plaintext, "secret"),
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let encrypted = encrypt_secret(&key, "secret material here").expect("encryption succeeds");

        let mut raw = BASE64.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        match decrypt_secret(&key, &tampered) {
            Err(_) => {}
            Ok(plaintext) => assert_ne!(plaintext, "secret material here"),
        }
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let key = test_key();
        let result = decrypt_secret(&key, "not!!valid##base64");
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = test_key();
        // Shorter than IV + one block
        let short = BASE64.encode([0u8; 20]);
        let result = decrypt_secret(&key, &short);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }

    #[test]
    fn test_misaligned_ciphertext_rejected() {
        let key = test_key();
        // IV present but ciphertext not a whole number of blocks
        let misaligned = BASE64.encode([0u8; IV_LEN + 17]);
        let result = decrypt_secret(&key, &misaligned);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = BASE64.encode([3u8; 32]);
        let key = CryptoKey::from_base64(&encoded).expect("valid encoded key");
        assert_eq!(key.as_bytes(), &[3u8; 32]);
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());

        let short = BASE64.encode([0u8; 16]);
        assert!(matches!(
            CryptoKey::from_base64(&short),
            Err(CryptoError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn test_iv_prefix_is_random() {
        let key = test_key();
        let first = BASE64
            .decode(encrypt_secret(&key, "x").unwrap())
            .unwrap();
        let second = BASE64
            .decode(encrypt_secret(&key, "x").unwrap())
            .unwrap();
        assert_ne!(&first[..IV_LEN], &second[..IV_LEN]);
    }
}
