//! AES-256-GCM field encryption

use crate::domain::errors::{CoreError, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use rand::RngCore;

const NONCE_LEN: usize = 12;

/// Field-level cipher bound to the master key
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &[u8]) -> Self {
        // Key length is enforced by the keystore before we get here.
        let cipher = Aes256Gcm::new_from_slice(key).expect("master key must be 32 bytes");
        Self { cipher }
    }

    fn fresh_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt with a fresh nonce, returning base64 (ciphertext+tag, nonce)
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        let nonce_bytes = Self::fresh_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok((b64.encode(&ciphertext), b64.encode(nonce_bytes)))
    }

    /// Decrypt a (ciphertext, nonce) pair produced by [`FieldCipher::encrypt`]
    pub fn decrypt(&self, ciphertext_b64: &str, nonce_b64: &str) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD;

        let ciphertext = b64
            .decode(ciphertext_b64)
            .map_err(|e| CoreError::Crypto(format!("invalid ciphertext encoding: {}", e)))?;
        let nonce_bytes = b64
            .decode(nonce_b64)
            .map_err(|e| CoreError::Crypto(format!("invalid nonce encoding: {}", e)))?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(CoreError::Crypto(format!(
                "nonce has {} bytes, expected {}",
                nonce_bytes.len(),
                NONCE_LEN
            )));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CoreError::AuthTagMismatch)?;

        String::from_utf8(plaintext)
            .map_err(|e| CoreError::Crypto(format!("plaintext is not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        FieldCipher::new(&key)
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        let (ct, nonce) = c.encrypt("hello").unwrap();
        assert_eq!(c.decrypt(&ct, &nonce).unwrap(), "hello");
    }

    #[test]
    fn test_empty_and_unicode() {
        let c = cipher();
        for text in ["", "टोकन \u{1F4B0}", &"x".repeat(2048)] {
            let (ct, nonce) = c.encrypt(text).unwrap();
            assert_eq!(c.decrypt(&ct, &nonce).unwrap(), text);
        }
    }

    #[test]
    fn test_tamper_is_tag_mismatch() {
        let c = cipher();
        let (ct, nonce) = c.encrypt("token").unwrap();

        // Flip one byte of the decoded ciphertext.
        let b64 = base64::engine::general_purpose::STANDARD;
        let mut raw = b64.decode(&ct).unwrap();
        raw[0] ^= 0x01;
        let tampered = b64.encode(&raw);

        match c.decrypt(&tampered, &nonce) {
            Err(CoreError::AuthTagMismatch) => {}
            other => panic!("expected AuthTagMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_nonce_length_rejected() {
        let c = cipher();
        let (ct, _) = c.encrypt("token").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD;
        let short_nonce = b64.encode([0u8; 8]);
        assert!(matches!(
            c.decrypt(&ct, &short_nonce),
            Err(CoreError::Crypto(_))
        ));
    }
}
