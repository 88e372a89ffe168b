//! Argon2id peppered password hashing
//!
//! The pepper lives in the keystore, outside the relational store, so a
//! copied database file alone cannot be brute-forced offline.

use crate::domain::errors::{CoreError, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params, Version};
use base64::Engine;
use zeroize::Zeroizing;

/// Parameters sized for interactive desktop login
const M_COST_KIB: u32 = 19_456;
const T_COST: u32 = 2;
const P_COST: u32 = 1;

pub struct PepperedHasher {
    pepper_b64: Zeroizing<String>,
}

impl PepperedHasher {
    pub fn new(pepper: &[u8]) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        Self {
            pepper_b64: Zeroizing::new(b64.encode(pepper)),
        }
    }

    fn peppered(&self, password: &str) -> Zeroizing<String> {
        Zeroizing::new(format!("{}{}", password, self.pepper_b64.as_str()))
    }

    fn argon2() -> Result<Argon2<'static>> {
        let params = Params::new(M_COST_KIB, T_COST, P_COST, None)
            .map_err(|e| CoreError::Crypto(format!("argon2 params: {}", e)))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash into a PHC string with a random per-password salt
    pub fn hash(&self, password: &str) -> Result<String> {
        let peppered = self.peppered(password);
        let salt = SaltString::generate(&mut OsRng);
        let hash = Self::argon2()?
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|e| CoreError::Crypto(format!("password hashing failed: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Constant-time verification against a stored PHC string
    pub fn verify(&self, password: &str, phc: &str) -> Result<bool> {
        let peppered = self.peppered(password);
        let parsed = PasswordHash::new(phc)
            .map_err(|e| CoreError::Crypto(format!("invalid password hash: {}", e)))?;

        match Self::argon2()?.verify_password(peppered.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CoreError::Crypto(format!("verification failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PepperedHasher::new(b"pepper-bytes");
        let hash = hasher.hash("s3cret!").unwrap();
        assert!(hasher.verify("s3cret!", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let hasher = PepperedHasher::new(b"pepper-bytes");
        let h1 = hasher.hash("same").unwrap();
        let h2 = hasher.hash("same").unwrap();
        assert_ne!(h1, h2);
        assert!(hasher.verify("same", &h1).unwrap());
        assert!(hasher.verify("same", &h2).unwrap());
    }

    #[test]
    fn test_garbage_phc_is_error_not_false() {
        let hasher = PepperedHasher::new(b"pepper-bytes");
        assert!(hasher.verify("pw", "not-a-phc-string").is_err());
    }
}
