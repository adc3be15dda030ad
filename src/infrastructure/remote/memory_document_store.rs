use crate::application::ports::{
    Clock, DocumentData, DocumentListener, FieldUpdate, RemoteDocument, RemoteDocumentStore,
};
use crate::domain::timestamp::format_timestamp;
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

const DEFAULT_LISTENER_BUFFER: usize = 64;

type DocumentPath = (String, String);

/// プロセス内で完結するリモート文書ストア
///
/// オフライン状態を切り替えられるため、フォールバック経路の検証やローカル開発に使う。
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, BTreeMap<String, DocumentData>>>>,
    listeners: Arc<RwLock<HashMap<DocumentPath, HashMap<u64, mpsc::Sender<Option<RemoteDocument>>>>>>,
    next_listener_id: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDocumentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_listener_id: Arc::new(AtomicU64::new(1)),
            offline: Arc::new(AtomicBool::new(false)),
            clock,
        }
    }

    /// true の間はすべての操作が `AppError::Network` で失敗する
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// 文書を丸ごと置き換える（初期データ投入用）
    pub async fn put_document(&self, collection: &str, id: &str, data: DocumentData) {
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data);
        }
        self.notify(collection, id).await;
    }

    pub async fn delete_document(&self, collection: &str, id: &str) {
        {
            let mut collections = self.collections.write().await;
            if let Some(documents) = collections.get_mut(collection) {
                documents.remove(id);
            }
        }
        self.notify(collection, id).await;
    }

    pub async fn listener_count(&self, collection: &str, id: &str) -> usize {
        let listeners = self.listeners.read().await;
        listeners
            .get(&(collection.to_string(), id.to_string()))
            .map(|senders| senders.values().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn ensure_online(&self) -> Result<(), AppError> {
        if self.is_offline() {
            return Err(AppError::Network("Remote document store is offline".to_string()));
        }
        Ok(())
    }

    async fn read(&self, collection: &str, id: &str) -> Option<RemoteDocument> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|data| RemoteDocument::new(id, data.clone()))
    }

    fn apply_update(&self, data: &mut DocumentData, field: String, update: FieldUpdate) {
        match update {
            FieldUpdate::Set(value) => {
                data.insert(field, value);
            }
            FieldUpdate::Increment(amount) => {
                let current = data.get(&field).and_then(Value::as_i64).unwrap_or(0);
                data.insert(field, Value::from(current.saturating_add(amount)));
            }
            FieldUpdate::ArrayUnion(values) => {
                let mut items = take_array(data.remove(&field));
                for value in values {
                    if !items.contains(&value) {
                        items.push(value);
                    }
                }
                data.insert(field, Value::Array(items));
            }
            FieldUpdate::ArrayRemove(values) => {
                let mut items = take_array(data.remove(&field));
                items.retain(|item| !values.contains(item));
                data.insert(field, Value::Array(items));
            }
            FieldUpdate::ServerTimestamp => {
                data.insert(field, format_timestamp(self.clock.now()));
            }
        }
    }

    async fn notify(&self, collection: &str, id: &str) {
        let path = (collection.to_string(), id.to_string());
        let senders: Vec<(u64, mpsc::Sender<Option<RemoteDocument>>)> = {
            let listeners = self.listeners.read().await;
            match listeners.get(&path) {
                Some(senders) if !senders.is_empty() => senders
                    .iter()
                    .map(|(&listener_id, sender)| (listener_id, sender.clone()))
                    .collect(),
                _ => return,
            }
        };

        let snapshot = self.read(collection, id).await;
        let mut closed_ids = Vec::new();
        for (listener_id, sender) in senders {
            match sender.try_send(snapshot.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // 受信側は毎回読み直すので取りこぼしは後続の通知で回収される
                    warn!(
                        "Listener {} for {}/{} is lagging; dropping snapshot",
                        listener_id, collection, id
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed_ids.push(listener_id),
            }
        }

        if !closed_ids.is_empty() {
            let mut listeners = self.listeners.write().await;
            if let Some(senders) = listeners.get_mut(&path) {
                for listener_id in closed_ids {
                    senders.remove(&listener_id);
                }
                if senders.is_empty() {
                    listeners.remove(&path);
                }
            }
        }
    }
}

fn take_array(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[async_trait]
impl RemoteDocumentStore for InMemoryDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<RemoteDocument>, AppError> {
        self.ensure_online()?;
        Ok(self.read(collection, id).await)
    }

    async fn list_collection(&self, collection: &str) -> Result<Vec<RemoteDocument>, AppError> {
        self.ensure_online()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, data)| RemoteDocument::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), AppError> {
        self.ensure_online()?;
        {
            let mut collections = self.collections.write().await;
            let data = collections
                .get_mut(collection)
                .and_then(|documents| documents.get_mut(id))
                .ok_or_else(|| AppError::NotFound(format!("Document not found: {collection}/{id}")))?;
            for (field, update) in updates {
                self.apply_update(data, field, update);
            }
        }
        self.notify(collection, id).await;
        Ok(())
    }

    async fn merge_set(
        &self,
        collection: &str,
        id: &str,
        data: DocumentData,
    ) -> Result<(), AppError> {
        self.ensure_online()?;
        {
            let mut collections = self.collections.write().await;
            let document = collections
                .entry(collection.to_string())
                .or_default()
                .entry(id.to_string())
                .or_default();
            for (field, value) in data {
                document.insert(field, value);
            }
        }
        self.notify(collection, id).await;
        Ok(())
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<DocumentListener, AppError> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::channel(DEFAULT_LISTENER_BUFFER);
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);

        // 購読直後に現在の状態を 1 件届ける
        let snapshot = self.read(collection, id).await;
        if tx.try_send(snapshot).is_err() {
            return Err(AppError::Internal("Listener closed before first snapshot".to_string()));
        }

        let mut listeners = self.listeners.write().await;
        listeners
            .entry((collection.to_string(), id.to_string()))
            .or_default()
            .insert(listener_id, tx);
        debug!("Listener {} attached to {}/{}", listener_id, collection, id);
        Ok(rx)
    }
}
