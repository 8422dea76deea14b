//! SQLite storage backend
//!
//! Durable key/value table behind the `Storage` contract, used by the service
//! binary and the audit verification tool.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::Storage;
use crate::error::ConsentError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
"#;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, ConsentError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite storage ready at {}", database_url);
        Ok(store)
    }

    /// Single-connection in-memory database; every pooled connection would
    /// otherwise see its own empty database.
    pub async fn new_in_memory() -> Result<Self, ConsentError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), ConsentError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ConsentError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM records WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<(), ConsentError> {
        sqlx::query(
            r#"
            INSERT INTO records (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, ConsentError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT key, value FROM records
            WHERE substr(key, 1, length(?1)) = ?1
            ORDER BY key ASC
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, key: &str) -> Result<(), ConsentError> {
        sqlx::query("DELETE FROM records WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.put("citizen/C1", "{}".to_string()).await.unwrap();
        store.put("citizen/C1", "{\"v\":2}".to_string()).await.unwrap();
        assert_eq!(
            store.get("citizen/C1").await.unwrap(),
            Some("{\"v\":2}".to_string())
        );

        store.delete("citizen/C1").await.unwrap();
        assert_eq!(store.get("citizen/C1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_does_not_treat_wildcards_specially() {
        let store = SqliteStore::new_in_memory().await.unwrap();
        store.put("audit/C_1/1", "a".to_string()).await.unwrap();
        store.put("audit/CX1/1", "b".to_string()).await.unwrap();
        let listed = store.list_by_prefix("audit/C_1/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1, "a");
    }

    #[tokio::test]
    async fn test_file_backed_persistence() {
        let temp_dir = tempdir().unwrap();
        let url = format!("sqlite://{}", temp_dir.path().join("gate.db").display());

        let store = SqliteStore::new(&url).await.unwrap();
        store.put("proof/p1", "x".to_string()).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::new(&url).await.unwrap();
        assert_eq!(reopened.get("proof/p1").await.unwrap(), Some("x".to_string()));
    }
}
