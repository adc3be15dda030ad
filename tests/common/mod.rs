#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hexpresso_lib::application::ports::{
    BundledDatasets, DocumentData, DocumentListener, FieldUpdate, RemoteDocument,
    RemoteDocumentStore,
};
use hexpresso_lib::application::services::FreshnessReconciler;
use hexpresso_lib::domain::entities::DatasetSpec;
use hexpresso_lib::domain::value_objects::UserId;
use hexpresso_lib::infrastructure::{
    ConnectionPool, InMemoryDocumentStore, ManualClock, SqliteKeyValueStore,
};
use hexpresso_lib::shared::config::DatasetConfig;
use hexpresso_lib::AppError;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

pub struct TestContext {
    pub pool: ConnectionPool,
    pub cache: Arc<SqliteKeyValueStore>,
    pub remote: Arc<InMemoryDocumentStore>,
    pub clock: Arc<ManualClock>,
}

pub fn start_of_test_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
}

pub async fn setup_context() -> TestContext {
    let pool = ConnectionPool::from_memory().await.expect("in-memory sqlite");
    pool.migrate().await.expect("migrations");

    let clock = Arc::new(ManualClock::new(start_of_test_day()));
    let remote = Arc::new(InMemoryDocumentStore::new(clock.clone()));

    TestContext {
        cache: Arc::new(SqliteKeyValueStore::new(pool.clone())),
        pool,
        remote,
        clock,
    }
}

pub fn build_reconciler(
    ctx: &TestContext,
    remote: Arc<dyn RemoteDocumentStore>,
    bundled: Arc<dyn BundledDatasets>,
) -> FreshnessReconciler {
    FreshnessReconciler::new(
        ctx.cache.clone(),
        remote,
        bundled,
        DatasetConfig::default(),
        DatasetSpec::defaults(),
    )
}

pub fn document(value: Value) -> DocumentData {
    value.as_object().cloned().expect("object literal")
}

pub fn unique_uid() -> UserId {
    UserId::parse(&format!("user-{}", uuid::Uuid::new_v4())).expect("uid")
}

/// 条件が満たされるまで待つ（最大 5 秒）
pub async fn eventually<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// 読み取りが永遠に返らないリモート
pub struct StallingRemote;

#[async_trait]
impl RemoteDocumentStore for StallingRemote {
    async fn get_document(
        &self,
        _collection: &str,
        _id: &str,
    ) -> Result<Option<RemoteDocument>, AppError> {
        std::future::pending().await
    }

    async fn list_collection(&self, _collection: &str) -> Result<Vec<RemoteDocument>, AppError> {
        std::future::pending().await
    }

    async fn update_fields(
        &self,
        _collection: &str,
        _id: &str,
        _updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), AppError> {
        std::future::pending().await
    }

    async fn merge_set(
        &self,
        _collection: &str,
        _id: &str,
        _data: DocumentData,
    ) -> Result<(), AppError> {
        std::future::pending().await
    }

    async fn subscribe_document(
        &self,
        _collection: &str,
        _id: &str,
    ) -> Result<DocumentListener, AppError> {
        std::future::pending().await
    }
}

/// 文書の読み取り直後に 2 者が揃うまで待たせるリモート
pub struct BarrierRemote {
    inner: Arc<InMemoryDocumentStore>,
    barrier: Barrier,
}

impl BarrierRemote {
    pub fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            inner,
            barrier: Barrier::new(2),
        }
    }
}

#[async_trait]
impl RemoteDocumentStore for BarrierRemote {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<RemoteDocument>, AppError> {
        let document = self.inner.get_document(collection, id).await?;
        self.barrier.wait().await;
        Ok(document)
    }

    async fn list_collection(&self, collection: &str) -> Result<Vec<RemoteDocument>, AppError> {
        self.inner.list_collection(collection).await
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), AppError> {
        self.inner.update_fields(collection, id, updates).await
    }

    async fn merge_set(
        &self,
        collection: &str,
        id: &str,
        data: DocumentData,
    ) -> Result<(), AppError> {
        self.inner.merge_set(collection, id, data).await
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<DocumentListener, AppError> {
        self.inner.subscribe_document(collection, id).await
    }
}
