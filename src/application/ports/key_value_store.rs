use crate::shared::error::AppError;
use async_trait::async_trait;

/// 端末ローカルの永続 KV ストア（namespace ごとに分離）
///
/// 書き込みは 1 エントリ単位で原子的。後勝ち。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), AppError>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), AppError>;
    async fn clear(&self, namespace: &str) -> Result<(), AppError>;
}
