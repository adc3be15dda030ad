use crate::application::ports::KeyValueStore;
use crate::infrastructure::database::ConnectionPool;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// 1 件分のキャッシュエントリ（運用ツールでの一覧表示用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: ConnectionPool,
}

impl SqliteKeyValueStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &SqlitePool {
        self.pool.get_pool()
    }

    /// namespace 内（省略時は全体）のエントリを列挙する
    pub async fn entries(&self, namespace: Option<&str>) -> Result<Vec<KvEntry>, AppError> {
        let rows = match namespace {
            Some(namespace) => {
                sqlx::query(
                    r#"
                    SELECT namespace, key, value, updated_at
                    FROM kv_entries
                    WHERE namespace = ?1
                    ORDER BY key
                    "#,
                )
                .bind(namespace)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT namespace, key, value, updated_at
                    FROM kv_entries
                    ORDER BY namespace, key
                    "#,
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| KvEntry {
                namespace: row.get("namespace"),
                key: row.get("key"),
                value: row.get("value"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    pub async fn namespaces(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT DISTINCT namespace FROM kv_entries ORDER BY namespace")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|row| row.get("namespace")).collect())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2")
            .bind(namespace)
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2")
            .bind(namespace)
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM kv_entries WHERE namespace = ?1")
            .bind(namespace)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> SqliteKeyValueStore {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        SqliteKeyValueStore::new(pool)
    }

    #[tokio::test]
    async fn test_set_overwrites_and_get_returns_latest() {
        let store = setup_store().await;
        assert_eq!(store.get("signs_data", "signs_data").await.unwrap(), None);

        store.set("signs_data", "signs_data", "[\"A\"]").await.unwrap();
        store.set("signs_data", "signs_data", "[\"A\",\"B\"]").await.unwrap();

        assert_eq!(
            store.get("signs_data", "signs_data").await.unwrap().as_deref(),
            Some("[\"A\",\"B\"]")
        );
        assert_eq!(store.entries(Some("signs_data")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_only_touches_one_namespace() {
        let store = setup_store().await;
        store.set("seers_data", "seers_data", "[]").await.unwrap();
        store.set("theme_preferences", "theme", "dark").await.unwrap();

        store.clear("seers_data").await.unwrap();

        assert_eq!(store.get("seers_data", "seers_data").await.unwrap(), None);
        assert_eq!(
            store.get("theme_preferences", "theme").await.unwrap().as_deref(),
            Some("dark")
        );
        assert_eq!(store.namespaces().await.unwrap(), vec!["theme_preferences".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_removes_single_entry() {
        let store = setup_store().await;
        store.set("theme_preferences", "theme", "light").await.unwrap();
        store.delete("theme_preferences", "theme").await.unwrap();
        assert!(store.entries(None).await.unwrap().is_empty());
    }
}
