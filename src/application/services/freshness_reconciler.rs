use crate::application::ports::{BundledDatasets, KeyValueStore, RemoteDocumentStore};
use crate::domain::entities::{DataSource, DatasetLoad, DatasetSnapshot, DatasetSpec};
use crate::domain::value_objects::DatasetKey;
use crate::shared::config::DatasetConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::{AtomicMetric, AtomicSnapshot};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// データセットの表示状態を購読するハンドル
#[derive(Clone)]
pub struct DatasetHandle {
    receiver: watch::Receiver<DatasetSnapshot>,
}

impl DatasetHandle {
    pub fn current(&self) -> DatasetSnapshot {
        self.receiver.borrow().clone()
    }

    /// 次の差し替えを待つ
    pub async fn changed(&mut self) -> Result<DatasetSnapshot, AppError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| AppError::Internal("Dataset view has been closed".to_string()))?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, AppError> {
        Ok(self.receiver.borrow().decode()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerMetricsSnapshot {
    pub remote_fetches: AtomicSnapshot,
    pub revalidations: AtomicSnapshot,
    pub fallbacks: AtomicSnapshot,
}

#[derive(Default)]
struct ReconcilerMetrics {
    remote_fetches: AtomicMetric,
    revalidations: AtomicMetric,
    fallbacks: AtomicMetric,
}

struct DatasetView {
    spec: DatasetSpec,
    sender: watch::Sender<DatasetSnapshot>,
    /// サインアウト時に進める。古い世代のバックグラウンド処理は書き込まない
    epoch: AtomicU64,
    /// キャッシュ書き込みと表示更新を直列化する
    write_lock: Mutex<()>,
}

impl DatasetView {
    fn new(spec: DatasetSpec) -> Self {
        let (sender, _) = watch::channel(DatasetSnapshot::empty(spec.key.clone()));
        Self {
            spec,
            sender,
            epoch: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    fn namespace(&self) -> &str {
        self.spec.key.as_str()
    }

    fn publish(&self, documents: Vec<Value>, source: DataSource, error: Option<String>) {
        self.sender.send_modify(|snapshot| {
            snapshot.documents = documents;
            snapshot.source = source;
            snapshot.revision += 1;
            snapshot.error = error;
        });
    }
}

struct ReconcilerInner {
    cache: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteDocumentStore>,
    bundled: Arc<dyn BundledDatasets>,
    config: DatasetConfig,
    views: HashMap<DatasetKey, Arc<DatasetView>>,
    metrics: ReconcilerMetrics,
    closed: AtomicBool,
}

/// キャッシュ優先の読み込みと、更新フラグに基づくバックグラウンド再検証
pub struct FreshnessReconciler {
    inner: Arc<ReconcilerInner>,
    tasks: Mutex<JoinSet<()>>,
}

impl FreshnessReconciler {
    pub fn new(
        cache: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteDocumentStore>,
        bundled: Arc<dyn BundledDatasets>,
        config: DatasetConfig,
        specs: Vec<DatasetSpec>,
    ) -> Self {
        let views = specs
            .into_iter()
            .map(|spec| (spec.key.clone(), Arc::new(DatasetView::new(spec))))
            .collect();

        Self {
            inner: Arc::new(ReconcilerInner {
                cache,
                remote,
                bundled,
                config,
                views,
                metrics: ReconcilerMetrics::default(),
                closed: AtomicBool::new(false),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn dataset_keys(&self) -> Vec<DatasetKey> {
        let mut keys: Vec<DatasetKey> = self.inner.views.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// キャッシュがあれば即座に返し、裏で再検証する。無ければリモート取得を待つ
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &DatasetKey,
    ) -> Result<DatasetLoad<T>, AppError> {
        let view = self.inner.view(key)?;
        let epoch = view.epoch.load(Ordering::SeqCst);

        if let Some(documents) = self.inner.read_cache(&view).await {
            match decode_documents::<T>(&documents) {
                Ok(data) => {
                    debug!("Serving {} from cache ({} entries)", key, data.len());
                    if self
                        .inner
                        .commit(&view, epoch, documents, DataSource::Cache, None, false)
                        .await
                    {
                        self.spawn_revalidation(view, epoch).await;
                    }
                    return Ok(DatasetLoad {
                        data,
                        source: DataSource::Cache,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!("Cached payload for {} does not match the expected shape: {}", key, err);
                }
            }
        }

        let snapshot = self.inner.fetch_with_fallback(&view, epoch, true).await;
        into_load(snapshot)
    }

    /// リモート取得を強制する。失敗時はキャッシュ、同梱データの順に退避する
    pub async fn refresh<T: DeserializeOwned>(&self, key: &DatasetKey) -> Result<Vec<T>, AppError> {
        let view = self.inner.view(key)?;
        let epoch = view.epoch.load(Ordering::SeqCst);
        let snapshot = self.inner.fetch_with_fallback(&view, epoch, false).await;
        into_load(snapshot).map(|load| load.data)
    }

    pub fn observe(&self, key: &DatasetKey) -> Result<DatasetHandle, AppError> {
        let view = self.inner.view(key)?;
        Ok(DatasetHandle {
            receiver: view.sender.subscribe(),
        })
    }

    pub fn snapshot(&self, key: &DatasetKey) -> Result<DatasetSnapshot, AppError> {
        Ok(self.inner.view(key)?.sender.borrow().clone())
    }

    /// 全データセットのキャッシュと表示状態を消去する（サインアウト時）
    pub async fn clear_all(&self) -> Result<(), AppError> {
        for key in self.dataset_keys() {
            let view = self.inner.view(&key)?;
            let _guard = view.write_lock.lock().await;
            view.epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.cache.clear(view.namespace()).await?;
            view.sender
                .send_replace(DatasetSnapshot::empty(view.spec.key.clone()));
        }
        info!("Cleared all dataset caches");
        Ok(())
    }

    /// 起動済みのバックグラウンド再検証がすべて終わるまで待つ
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(result) = pending.join_next().await {
            if let Err(err) = result {
                if err.is_panic() {
                    error!("Background revalidation panicked: {}", err);
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    pub fn metrics(&self) -> ReconcilerMetricsSnapshot {
        ReconcilerMetricsSnapshot {
            remote_fetches: self.inner.metrics.remote_fetches.snapshot(),
            revalidations: self.inner.metrics.revalidations.snapshot(),
            fallbacks: self.inner.metrics.fallbacks.snapshot(),
        }
    }

    async fn spawn_revalidation(&self, view: Arc<DatasetView>, epoch: u64) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            inner.revalidate(view, epoch).await;
        });
    }
}

impl ReconcilerInner {
    fn view(&self, key: &DatasetKey) -> Result<Arc<DatasetView>, AppError> {
        self.views
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown dataset key: {key}")))
    }

    /// 存在しない・空・壊れたキャッシュは `None`
    async fn read_cache(&self, view: &DatasetView) -> Option<Vec<Value>> {
        let namespace = view.namespace();
        let raw = match self.cache.get(namespace, namespace).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to read cache for {}: {}", namespace, err);
                return None;
            }
        };

        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(documents) if documents.is_empty() => None,
            Ok(documents) => Some(documents),
            Err(err) => {
                warn!("Ignoring malformed cache for {}: {}", namespace, err);
                None
            }
        }
    }

    async fn write_cache(&self, view: &DatasetView, documents: &[Value]) {
        let namespace = view.namespace();
        let payload = match serde_json::to_string(documents) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode cache for {}: {}", namespace, err);
                return;
            }
        };
        if let Err(err) = self.cache.set(namespace, namespace, &payload).await {
            warn!("Failed to write cache for {}: {}", namespace, err);
        }
    }

    async fn fetch_remote(&self, view: &DatasetView) -> Result<Vec<Value>, AppError> {
        let documents = self.remote.list_collection(&view.spec.collection).await?;
        Ok(documents
            .into_iter()
            .map(|document| document.into_record())
            .collect())
    }

    /// リモート → キャッシュ → 同梱データの順に取得を試みる
    async fn fetch_with_fallback(
        &self,
        view: &DatasetView,
        epoch: u64,
        cache_checked: bool,
    ) -> DatasetSnapshot {
        let key = &view.spec.key;

        match self.fetch_remote(view).await {
            Ok(documents) if !documents.is_empty() => {
                self.metrics.remote_fetches.record_success();
                info!("Fetched {} entries for {} from remote", documents.len(), key);
                self.commit(view, epoch, documents, DataSource::Remote, None, true)
                    .await;
                return view.sender.borrow().clone();
            }
            Ok(_) => {
                self.metrics.remote_fetches.record_failure();
                warn!("Remote collection {} is empty", view.spec.collection);
            }
            Err(err) if err.is_network() => {
                self.metrics.remote_fetches.record_failure();
                warn!("Remote unreachable for {}; falling back: {}", key, err);
            }
            Err(err) => {
                self.metrics.remote_fetches.record_failure();
                error!("Remote fetch for {} failed: {}", key, err);
            }
        }

        if !cache_checked {
            if let Some(documents) = self.read_cache(view).await {
                self.metrics.fallbacks.record_success();
                debug!("Falling back to cached {}", key);
                self.commit(view, epoch, documents, DataSource::Cache, None, false)
                    .await;
                return view.sender.borrow().clone();
            }
        }

        if let Some(documents) = self.bundled.fallback(key).filter(|docs| !docs.is_empty()) {
            self.metrics.fallbacks.record_success();
            info!("Using bundled fallback for {} ({} entries)", key, documents.len());
            self.commit(view, epoch, documents, DataSource::BundledFallback, None, true)
                .await;
            return view.sender.borrow().clone();
        }

        self.metrics.fallbacks.record_failure();
        let current = view.sender.borrow().clone();
        if current.has_data() {
            // 表示中のデータは残す
            warn!("No fresh data for {}; keeping current {}", key, current.source.as_str());
            return current;
        }

        let message = format!("No data available for {key}");
        error!("{}", message);
        self.commit(view, epoch, Vec::new(), DataSource::Unavailable, Some(message), false)
            .await;
        view.sender.borrow().clone()
    }

    /// 世代が変わっていなければキャッシュ書き込みと表示更新を行う。反映したら true
    async fn commit(
        &self,
        view: &DatasetView,
        epoch: u64,
        documents: Vec<Value>,
        source: DataSource,
        error: Option<String>,
        write_cache: bool,
    ) -> bool {
        let _guard = view.write_lock.lock().await;
        if !self.is_current(view, epoch) {
            debug!("Discarding stale {} result for {}", source.as_str(), view.spec.key);
            return false;
        }
        if write_cache {
            self.write_cache(view, &documents).await;
        }
        view.publish(documents, source, error);
        true
    }

    async fn should_update(&self) -> Result<bool, AppError> {
        let flag = self
            .remote
            .get_document(
                &self.config.update_flag_collection,
                &self.config.update_flag_document,
            )
            .await?;
        Ok(flag
            .and_then(|document| document.data.get(&self.config.update_flag_field).cloned())
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    fn is_current(&self, view: &DatasetView, epoch: u64) -> bool {
        !self.closed.load(Ordering::SeqCst) && view.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn revalidate(&self, view: Arc<DatasetView>, epoch: u64) {
        let key = &view.spec.key;

        match self.should_update().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Update flag unset; keeping cached {}", key);
                self.metrics.revalidations.record_success();
                return;
            }
            Err(err) => {
                warn!("Failed to read update flag for {}: {}", key, err);
                self.metrics.revalidations.record_failure();
                return;
            }
        }

        let documents = match self.fetch_remote(&view).await {
            Ok(documents) if !documents.is_empty() => documents,
            Ok(_) => {
                warn!("Background fetch for {} returned no documents", key);
                self.metrics.revalidations.record_failure();
                return;
            }
            Err(err) if err.is_network() => {
                debug!("Background fetch for {} skipped while offline: {}", key, err);
                self.metrics.revalidations.record_failure();
                return;
            }
            Err(err) => {
                warn!("Background fetch for {} failed: {}", key, err);
                self.metrics.revalidations.record_failure();
                return;
            }
        };

        let count = documents.len();
        if self
            .commit(&view, epoch, documents, DataSource::Remote, None, true)
            .await
        {
            info!("Swapped {} with {} fresh entries", key, count);
            self.metrics.revalidations.record_success();
        }
    }
}

fn decode_documents<T: DeserializeOwned>(documents: &[Value]) -> Result<Vec<T>, serde_json::Error> {
    documents
        .iter()
        .cloned()
        .map(serde_json::from_value)
        .collect()
}

fn into_load<T: DeserializeOwned>(snapshot: DatasetSnapshot) -> Result<DatasetLoad<T>, AppError> {
    Ok(DatasetLoad {
        data: decode_documents(&snapshot.documents)?,
        source: snapshot.source,
        error: snapshot.error,
    })
}
