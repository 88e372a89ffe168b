//! Local user repository
//!
//! The store holds zero or one user. Absence means the system is in setup
//! state; presence means login state.

use super::models::UserRecord;
use super::DbPool;
use crate::domain::errors::Result;

pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2) RETURNING *",
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT * FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn exists(&self) -> Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Remove every user. Only used when the pepper is lost and password
    /// hashes can no longer verify.
    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = UserRepository::new(memory_store().await);
        assert!(!repo.exists().await.unwrap());

        let user = repo.create("alice", "phc$hash").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(repo.exists().await.unwrap());

        let found = repo.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_username_unique() {
        let repo = UserRepository::new(memory_store().await);
        repo.create("alice", "h1").await.unwrap();
        assert!(repo.create("alice", "h2").await.is_err());
    }
}
