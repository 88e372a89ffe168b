//! Secret Vault
//!
//! Custodies the master symmetric key and the password pepper behind a single
//! keystore entry, and exposes the only cryptographic primitives the rest of
//! the system is allowed to use: field encryption and peppered password
//! hashing.
//!
//! # Security Features
//! - One keystore unlock per application start
//! - Key material wrapped in `Zeroizing` and never written to disk in clear
//! - Fresh 96-bit nonce for every encryption; callers persist it next to the
//!   ciphertext

mod cipher;
mod keystore;
mod password;

pub use keystore::{Keystore, SecretMaterial};

use crate::domain::errors::Result;
use cipher::FieldCipher;
use password::PepperedHasher;

/// Vault facade combining the keystore-bound cipher and hasher
pub struct Vault {
    cipher: FieldCipher,
    hasher: PepperedHasher,
}

impl Vault {
    /// Open the vault, creating the master secrets on first run.
    ///
    /// This is the single keystore access of the process lifetime; both the
    /// cipher and the hasher are derived from the returned material.
    pub fn open(keystore: &Keystore) -> Result<Self> {
        let material = keystore.get_or_create()?;
        Ok(Self::from_material(&material))
    }

    fn from_material(material: &SecretMaterial) -> Self {
        Self {
            cipher: FieldCipher::new(&material.master_key),
            hasher: PepperedHasher::new(&material.pepper),
        }
    }

    /// Vault backed by throwaway secrets. For tests and dry runs only; data
    /// encrypted by it is unrecoverable after drop.
    pub fn ephemeral() -> Self {
        Self::from_material(&SecretMaterial::generate())
    }

    /// Encrypt a field, returning (ciphertext, nonce) as base64 strings.
    /// The nonce must be persisted alongside the ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        self.cipher.encrypt(plaintext)
    }

    /// Decrypt a field previously produced by [`Vault::encrypt`]
    pub fn decrypt(&self, ciphertext: &str, nonce: &str) -> Result<String> {
        self.cipher.decrypt(ciphertext, nonce)
    }

    /// Hash a password with Argon2id, peppered. CPU-bound; call from a
    /// blocking-work context.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        self.hasher.hash(password)
    }

    /// Verify a password against a stored PHC string
    pub fn verify_password(&self, password: &str, phc: &str) -> Result<bool> {
        self.hasher.verify(password, phc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_round_trip() {
        let vault = Vault::ephemeral();
        let (ciphertext, nonce) = vault.encrypt("auth_token_12345").unwrap();
        assert_eq!(vault.decrypt(&ciphertext, &nonce).unwrap(), "auth_token_12345");
    }

    #[test]
    fn test_nonces_are_unique() {
        let vault = Vault::ephemeral();
        let (c1, n1) = vault.encrypt("same").unwrap();
        let (c2, n2) = vault.encrypt("same").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let vault = Vault::ephemeral();
        let (ciphertext, _) = vault.encrypt("secret").unwrap();
        let (_, other_nonce) = vault.encrypt("other").unwrap();
        assert!(vault.decrypt(&ciphertext, &other_nonce).is_err());
    }

    #[test]
    fn test_password_hash_and_verify() {
        let vault = Vault::ephemeral();
        let hash = vault.hash_password("pw1").unwrap();
        assert!(vault.verify_password("pw1", &hash).unwrap());
        assert!(!vault.verify_password("pw2", &hash).unwrap());
    }

    #[test]
    fn test_pepper_binds_hash_to_vault() {
        let a = Vault::ephemeral();
        let b = Vault::ephemeral();
        let hash = a.hash_password("pw1").unwrap();
        // A different pepper must not verify the same password.
        assert!(!b.verify_password("pw1", &hash).unwrap());
    }
}
