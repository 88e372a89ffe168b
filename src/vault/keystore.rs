//! Master secret keystore
//!
//! One record under a well-known service name holds the 256-bit master key
//! and the password pepper. The default backend is the OS keychain; headless
//! deployments fall back to a file in the data directory with owner-only
//! permissions. Destroying the record makes every encrypted field and every
//! password hash unrecoverable.

use crate::domain::errors::{CoreError, Result};
use base64::Engine;
use keyring::Entry;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};
use zeroize::Zeroizing;

const SERVICE: &str = "algodesk";
const ACCOUNT: &str = "app-secrets";
const KEY_LEN: usize = 32;
const PEPPER_LEN: usize = 32;

/// Master key and pepper, zeroized on drop
pub struct SecretMaterial {
    pub master_key: Zeroizing<Vec<u8>>,
    pub pepper: Zeroizing<Vec<u8>>,
}

impl SecretMaterial {
    /// Generate fresh material from the OS entropy source
    pub fn generate() -> Self {
        let mut master_key = vec![0u8; KEY_LEN];
        let mut pepper = vec![0u8; PEPPER_LEN];
        rand::rngs::OsRng.fill_bytes(&mut master_key);
        rand::rngs::OsRng.fill_bytes(&mut pepper);
        Self {
            master_key: Zeroizing::new(master_key),
            pepper: Zeroizing::new(pepper),
        }
    }
}

/// Serialized payload of the keystore record
#[derive(Serialize, Deserialize)]
struct StoredSecrets {
    master_key: String,
    pepper: String,
}

impl StoredSecrets {
    fn encode(material: &SecretMaterial) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        Self {
            master_key: b64.encode(material.master_key.as_slice()),
            pepper: b64.encode(material.pepper.as_slice()),
        }
    }

    fn decode(&self) -> Result<SecretMaterial> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let master_key = b64
            .decode(&self.master_key)
            .map_err(|e| CoreError::Crypto(format!("invalid master key encoding: {}", e)))?;
        let pepper = b64
            .decode(&self.pepper)
            .map_err(|e| CoreError::Crypto(format!("invalid pepper encoding: {}", e)))?;
        if master_key.len() != KEY_LEN {
            return Err(CoreError::Crypto(format!(
                "master key has {} bytes, expected {}",
                master_key.len(),
                KEY_LEN
            )));
        }
        Ok(SecretMaterial {
            master_key: Zeroizing::new(master_key),
            pepper: Zeroizing::new(pepper),
        })
    }
}

/// Backend holding the single master-secret record
pub enum Keystore {
    /// OS keychain entry under the well-known service name
    Keychain,
    /// Owner-only file for headless deployments
    File(PathBuf),
}

impl Keystore {
    /// File-backed keystore rooted in the application data directory
    pub fn file_in(data_dir: &std::path::Path) -> Self {
        Keystore::File(data_dir.join("secrets.json"))
    }

    /// Load the secrets, generating and persisting them on first run
    pub fn get_or_create(&self) -> Result<SecretMaterial> {
        match self {
            Keystore::Keychain => self.keychain_get_or_create(),
            Keystore::File(path) => self.file_get_or_create(path),
        }
    }

    fn keychain_get_or_create(&self) -> Result<SecretMaterial> {
        let entry = Entry::new(SERVICE, ACCOUNT)
            .map_err(|e| CoreError::Vault(format!("keychain entry: {}", e)))?;

        match entry.get_password() {
            Ok(json) => {
                let stored: StoredSecrets = serde_json::from_str(&json)?;
                stored.decode()
            }
            Err(keyring::Error::NoEntry) => {
                info!("no keystore record found, generating master secrets");
                let material = SecretMaterial::generate();
                let json = serde_json::to_string(&StoredSecrets::encode(&material))?;
                entry
                    .set_password(&json)
                    .map_err(|e| CoreError::Vault(format!("keychain write: {}", e)))?;
                Ok(material)
            }
            Err(e) => Err(CoreError::Vault(format!("keychain read: {}", e))),
        }
    }

    fn file_get_or_create(&self, path: &std::path::Path) -> Result<SecretMaterial> {
        if path.exists() {
            let json = std::fs::read_to_string(path)?;
            let stored: StoredSecrets = serde_json::from_str(&json)?;
            return stored.decode();
        }

        warn!("using file-backed keystore at {:?}; prefer the OS keychain where available", path);
        let material = SecretMaterial::generate();
        let json = serde_json::to_string(&StoredSecrets::encode(&material))?;

        // Write-then-rename so a crash never leaves a partial secret file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, path)?;

        Ok(material)
    }
}
