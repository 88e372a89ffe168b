//! Broker credential repository
//!
//! API key and secret are ciphertext with independent nonces; the client id
//! is plaintext. At most one row per broker.

use super::models::BrokerCredentialRecord;
use super::DbPool;
use crate::domain::errors::Result;

pub struct CredentialRepository {
    pool: DbPool,
}

pub struct EncryptedCredential<'a> {
    pub broker_id: &'a str,
    pub api_key: String,
    pub api_key_nonce: String,
    pub api_secret: Option<String>,
    pub api_secret_nonce: Option<String>,
    pub client_id: Option<String>,
}

impl CredentialRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, cred: EncryptedCredential<'_>) -> Result<()> {
        sqlx::query(
            "INSERT INTO broker_credentials
                (broker_id, api_key, api_key_nonce, api_secret, api_secret_nonce, client_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
             ON CONFLICT(broker_id) DO UPDATE SET
                api_key = excluded.api_key,
                api_key_nonce = excluded.api_key_nonce,
                api_secret = excluded.api_secret,
                api_secret_nonce = excluded.api_secret_nonce,
                client_id = excluded.client_id,
                updated_at = datetime('now')",
        )
        .bind(cred.broker_id)
        .bind(&cred.api_key)
        .bind(&cred.api_key_nonce)
        .bind(&cred.api_secret)
        .bind(&cred.api_secret_nonce)
        .bind(&cred.client_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, broker_id: &str) -> Result<Option<BrokerCredentialRecord>> {
        let record = sqlx::query_as::<_, BrokerCredentialRecord>(
            "SELECT id, broker_id, api_key, api_key_nonce, api_secret, api_secret_nonce, client_id
             FROM broker_credentials WHERE broker_id = ?1",
        )
        .bind(broker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn delete(&self, broker_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM broker_credentials WHERE broker_id = ?1")
            .bind(broker_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Broker ids with stored credentials
    pub async fn list_broker_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT broker_id FROM broker_credentials ORDER BY broker_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    #[tokio::test]
    async fn test_upsert_find_delete() {
        let repo = CredentialRepository::new(memory_store().await);

        repo.upsert(EncryptedCredential {
            broker_id: "fyers",
            api_key: "ct-key".to_string(),
            api_key_nonce: "n1".to_string(),
            api_secret: Some("ct-secret".to_string()),
            api_secret_nonce: Some("n2".to_string()),
            client_id: Some("FY1234".to_string()),
        })
        .await
        .unwrap();

        let found = repo.find("fyers").await.unwrap().unwrap();
        assert_eq!(found.client_id.as_deref(), Some("FY1234"));
        assert_ne!(found.api_key_nonce, found.api_secret_nonce.clone().unwrap());

        assert_eq!(repo.list_broker_ids().await.unwrap(), vec!["fyers"]);
        assert!(repo.delete("fyers").await.unwrap());
        assert!(!repo.delete("fyers").await.unwrap());
    }
}
