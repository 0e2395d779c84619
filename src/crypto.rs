//! Symmetric confidentiality at rest for host secrets (C1).
//!
//! AES-256-CFB, a random 16-byte IV per encryption, URL-safe base64 of
//! `IV || ciphertext`. Decryption tolerates input that isn't valid
//! URL-safe base64 by reporting `CryptoFormat` rather than failing hard,
//! so a caller on the tolerant read path (§4.3) can pass the field
//! through unchanged for legacy plaintext rows.

use crate::error::{EngineError, Result};
use aes::Aes256;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Holds the derived 32-byte AES key. Cheap to clone; the key bytes are
/// not secret beyond process memory (no zeroize requirement was named).
#[derive(Clone)]
pub struct CryptoBox {
    key: [u8; KEY_LEN],
}

impl CryptoBox {
    /// Derive the key from a configured string: UTF-8 bytes, zero-padded
    /// on the right if shorter than 32 bytes, truncated if longer.
    pub fn new(key_string: &str) -> Self {
        let bytes = key_string.as_bytes();
        let mut key = [0u8; KEY_LEN];
        let n = bytes.len().min(KEY_LEN);
        key[..n].copy_from_slice(&bytes[..n]);
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buf = plaintext.as_bytes().to_vec();
        Aes256CfbEnc::new(&self.key.into(), &iv.into()).encrypt(&mut buf);

        let mut out = Vec::with_capacity(IV_LEN + buf.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&buf);
        URL_SAFE.encode(out)
    }

    /// Decrypt `ciphertext`. Returns `Err(CryptoFormat)` when the input
    /// isn't valid URL-safe base64. This is the expected "not
    /// ciphertext" signal, not a fatal error.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let raw = URL_SAFE
            .decode(ciphertext)
            .map_err(|_| EngineError::CryptoFormat)?;

        if raw.len() < IV_LEN {
            return Err(EngineError::CryptoIntegrity(
                "ciphertext shorter than IV".to_string(),
            ));
        }

        let (iv, body) = raw.split_at(IV_LEN);
        let mut buf = body.to_vec();
        Aes256CfbDec::new(&self.key.into(), iv.into()).decrypt(&mut buf);

        String::from_utf8(buf)
            .map_err(|e| EngineError::CryptoIntegrity(format!("decrypted bytes are not valid UTF-8: {e}")))
    }

    /// Decrypt, but treat a `CryptoFormat` signal as "pass through
    /// unchanged". The tolerant read path used by the host service for
    /// legacy unencrypted rows (§4.3).
    pub fn decrypt_tolerant(&self, field: &str) -> Result<String> {
        if field.is_empty() {
            return Ok(String::new());
        }
        match self.decrypt(field) {
            Ok(plain) => Ok(plain),
            Err(EngineError::CryptoFormat) => Ok(field.to_string()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1: key="key" (padded to 32 bytes); encrypt "hunter2", decrypt;
    /// result is "hunter2".
    #[test]
    fn round_trip() {
        let cb = CryptoBox::new("key");
        let ciphertext = cb.encrypt("hunter2");
        assert_eq!(cb.decrypt(&ciphertext).unwrap(), "hunter2");
    }

    /// S1: decrypting non-base64 input yields CryptoFormat.
    #[test]
    fn not_base64_is_crypto_format() {
        let cb = CryptoBox::new("key");
        let err = cb.decrypt("$$$$").unwrap_err();
        assert!(matches!(err, EngineError::CryptoFormat));
    }

    #[test]
    fn tolerant_decrypt_passes_through_legacy_plaintext() {
        let cb = CryptoBox::new("key");
        assert_eq!(cb.decrypt_tolerant("not ciphertext at all").unwrap(), "not ciphertext at all");
    }

    #[test]
    fn tolerant_decrypt_still_decrypts_real_ciphertext() {
        let cb = CryptoBox::new("key");
        let ciphertext = cb.encrypt("s3cr3t");
        assert_eq!(cb.decrypt_tolerant(&ciphertext).unwrap(), "s3cr3t");
    }

    /// Invariant 1: round-trip for arbitrary plaintext, including empty
    /// and non-ASCII content.
    #[test]
    fn round_trip_non_ascii() {
        let cb = CryptoBox::new("a different configured key string");
        let ciphertext = cb.encrypt("héllo wörld 🔑");
        assert_eq!(cb.decrypt(&ciphertext).unwrap(), "héllo wörld 🔑");
    }

    #[test]
    fn key_longer_than_32_bytes_is_truncated() {
        let cb = CryptoBox::new(&"x".repeat(64));
        let ciphertext = cb.encrypt("payload");
        assert_eq!(cb.decrypt(&ciphertext).unwrap(), "payload");
    }
}
