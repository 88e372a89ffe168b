//! Inbound API key repository
//!
//! Keys presented by webhooks and the REST surface. Each key is stored twice:
//! an Argon2 hash for validation and an AES-GCM ciphertext so the operator
//! can re-display the key once created.

use super::models::ApiKeyRecord;
use super::DbPool;
use crate::domain::errors::{CoreError, Result};
use crate::vault::Vault;
use rand::RngCore;

pub struct ApiKeyRepository {
    pool: DbPool,
}

/// Random 64-hex-character key
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// First 8 and last 4 characters, for listings
pub fn mask_key(key: &str) -> String {
    if key.len() <= 12 {
        "*".repeat(key.len())
    } else {
        format!("{}...{}", &key[..8], &key[key.len() - 4..])
    }
}

impl ApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a named key; returns (id, plaintext). The plaintext is shown
    /// to the operator exactly once.
    pub async fn create(&self, name: &str, vault: &Vault) -> Result<(i64, String)> {
        let key = generate_key();
        let key_hash = vault.hash_password(&key)?;
        let (encrypted_key, nonce) = vault.encrypt(&key)?;

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO api_keys (name, key_hash, encrypted_key, nonce)
             VALUES (?1, ?2, ?3, ?4) RETURNING id",
        )
        .bind(name)
        .bind(&key_hash)
        .bind(&encrypted_key)
        .bind(&nonce)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("created API key '{}' with id {}", name, row.0);
        Ok((row.0, key))
    }

    /// Validate a presented key against every stored hash. Argon2 salts are
    /// random, so there is no direct lookup; a single-user desktop holds a
    /// handful of keys at most.
    pub async fn validate(&self, presented: &str, vault: &Vault) -> Result<ApiKeyRecord> {
        let keys = sqlx::query_as::<_, ApiKeyRecord>("SELECT * FROM api_keys")
            .fetch_all(&self.pool)
            .await?;

        for key in keys {
            if vault.verify_password(presented, &key.key_hash)? {
                let _ = sqlx::query(
                    "UPDATE api_keys SET last_used_at = datetime('now') WHERE id = ?1",
                )
                .bind(key.id)
                .execute(&self.pool)
                .await;
                return Ok(key);
            }
        }

        Err(CoreError::NotAuthenticated)
    }

    /// Masked listing for the UI
    pub async fn list_masked(&self, vault: &Vault) -> Result<Vec<(i64, String, String)>> {
        let keys = sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT * FROM api_keys ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keys
            .into_iter()
            .map(|k| {
                let masked = vault
                    .decrypt(&k.encrypted_key, &k.nonce)
                    .map(|plain| mask_key(&plain))
                    .unwrap_or_else(|_| "****...****".to_string());
                (k.id, k.name, masked)
            })
            .collect())
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM api_keys")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    #[test]
    fn test_generate_key_shape() {
        let key = generate_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_mask_key() {
        let masked = mask_key("abcdef0123456789abcdef0123456789");
        assert!(masked.starts_with("abcdef01"));
        assert!(masked.ends_with("6789"));
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let repo = ApiKeyRepository::new(memory_store().await);
        let vault = Vault::ephemeral();

        let (id, key) = repo.create("desk", &vault).await.unwrap();
        assert!(id > 0);

        let validated = repo.validate(&key, &vault).await.unwrap();
        assert_eq!(validated.name, "desk");
        assert!(repo.validate("not-the-key", &vault).await.is_err());
    }

    #[tokio::test]
    async fn test_list_masks_keys() {
        let repo = ApiKeyRepository::new(memory_store().await);
        let vault = Vault::ephemeral();
        let (_, key) = repo.create("desk", &vault).await.unwrap();

        let listed = repo.list_masked(&vault).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].2, key);
        assert!(listed[0].2.contains("..."));
    }
}
