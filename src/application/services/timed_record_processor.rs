use crate::application::ports::{Clock, DocumentListener, FieldUpdate, RemoteDocumentStore};
use crate::domain::entities::TimedRecord;
use crate::domain::entities::timed_record::dedup_and_sort;
use crate::domain::value_objects::UserId;
use crate::shared::config::TimedRecordConfig;
use crate::shared::error::AppError;
use crate::shared::metrics::{AtomicMetric, AtomicSnapshot};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 購読中の文書から読み取ったレコード一覧を受け取るコールバック
pub type RecordsCallback = Arc<dyn Fn(Vec<TimedRecord>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 完了にした件数
    Completed(usize),
    /// 同じ利用者のパスが実行中、または購読解除済み
    Skipped,
}

/// 利用者ごとの実行状態
struct IdentityWorker {
    in_flight: AtomicBool,
    alive: AtomicBool,
}

impl IdentityWorker {
    fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Subscription {
    worker: Arc<IdentityWorker>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Subscription {
    fn stop(mut self) -> JoinHandle<()> {
        self.worker.alive.store(false, Ordering::SeqCst);
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
    }
}

struct ProcessorInner {
    remote: Arc<dyn RemoteDocumentStore>,
    clock: Arc<dyn Clock>,
    users_collection: String,
    config: TimedRecordConfig,
    workers: StdMutex<HashMap<UserId, Arc<IdentityWorker>>>,
    passes: AtomicMetric,
}

/// 利用者文書の変更を購読し、期限の来た時限レコードを完了にする
pub struct TimedRecordProcessor {
    inner: Arc<ProcessorInner>,
    subscriptions: Mutex<HashMap<UserId, Subscription>>,
}

impl TimedRecordProcessor {
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<dyn Clock>,
        users_collection: impl Into<String>,
        config: TimedRecordConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                remote,
                clock,
                users_collection: users_collection.into(),
                config,
                workers: StdMutex::new(HashMap::new()),
                passes: AtomicMetric::new(),
            }),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// 購読を開始する。既存の購読は置き換える
    pub async fn subscribe(&self, uid: &UserId, on_records: RecordsCallback) -> Result<(), AppError> {
        let listener = self
            .inner
            .remote
            .subscribe_document(&self.inner.users_collection, uid.as_str())
            .await?;

        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(previous) = subscriptions.remove(uid) {
            let _ = previous.stop();
            self.inner.forget_worker(uid);
        }

        let worker = self.inner.worker_for(uid);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_worker(
            Arc::clone(&self.inner),
            uid.clone(),
            Arc::clone(&worker),
            listener,
            stop_rx,
            on_records,
        ));

        subscriptions.insert(
            uid.clone(),
            Subscription {
                worker,
                stop: Some(stop_tx),
                task,
            },
        );
        info!("Subscribed to timed records of {}", uid);
        Ok(())
    }

    /// 購読を解除する。実行中のパスは次のレコードに進む前に止まる
    pub async fn unsubscribe(&self, uid: &UserId) -> bool {
        let removed = self.subscriptions.lock().await.remove(uid);
        self.inner.forget_worker(uid);
        match removed {
            Some(subscription) => {
                let _ = subscription.stop();
                info!("Unsubscribed from timed records of {}", uid);
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe_all(&self) {
        let drained: Vec<(UserId, Subscription)> =
            self.subscriptions.lock().await.drain().collect();
        for (uid, subscription) in drained {
            self.inner.forget_worker(&uid);
            let _ = subscription.stop();
        }
    }

    pub async fn is_subscribed(&self, uid: &UserId) -> bool {
        self.subscriptions.lock().await.contains_key(uid)
    }

    /// 停止を通知し、各ワーカーの終了を待つ
    pub async fn shutdown(&self) {
        let drained: Vec<(UserId, Subscription)> =
            self.subscriptions.lock().await.drain().collect();
        let handles: Vec<JoinHandle<()>> = drained
            .into_iter()
            .map(|(uid, subscription)| {
                self.inner.forget_worker(&uid);
                subscription.stop()
            })
            .collect();
        for result in join_all(handles).await {
            if let Err(err) = result {
                if err.is_panic() {
                    warn!("Timed record worker panicked: {}", err);
                }
            }
        }
    }

    /// 1 回分の照合パスを実行する
    pub async fn reconcile(&self, uid: &UserId) -> Result<ReconcileOutcome, AppError> {
        let worker = self.inner.worker_for(uid);
        self.inner.run_pass(uid, &worker).await
    }

    /// 最新の文書を読み、重複を除いて新しい順に返す
    pub async fn list_records(&self, uid: &UserId) -> Result<Vec<TimedRecord>, AppError> {
        let records = self.inner.read_records(uid).await?;
        Ok(dedup_and_sort(records))
    }

    /// pending のレコードの完了予定を早める。対象外なら false
    pub async fn speed_up(&self, uid: &UserId, record_id: &str) -> Result<bool, AppError> {
        let record = self
            .inner
            .read_records(uid)
            .await?
            .into_iter()
            .find(|record| record.id == record_id)
            .ok_or_else(|| AppError::NotFound(format!("Timed record not found: {record_id}")))?;

        let shift = chrono::Duration::seconds(
            self.inner.config.speed_up_secs.min(u64::from(u32::MAX)) as i64,
        );
        let Some(updated) = record.sped_up_value(shift, self.inner.clock.now()) else {
            debug!("Timed record {} cannot be sped up", record_id);
            return Ok(false);
        };

        self.inner.replace_record(uid, record.raw(), updated).await?;
        info!("Sped up timed record {} for {}", record_id, uid);
        Ok(true)
    }

    pub fn metrics(&self) -> AtomicSnapshot {
        self.inner.passes.snapshot()
    }
}

impl ProcessorInner {
    fn worker_for(&self, uid: &UserId) -> Arc<IdentityWorker> {
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            workers
                .entry(uid.clone())
                .or_insert_with(|| Arc::new(IdentityWorker::new())),
        )
    }

    fn forget_worker(&self, uid: &UserId) {
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(worker) = workers.remove(uid) {
            worker.alive.store(false, Ordering::SeqCst);
        }
    }

    async fn read_records(&self, uid: &UserId) -> Result<Vec<TimedRecord>, AppError> {
        let document = self
            .remote
            .get_document(&self.users_collection, uid.as_str())
            .await?;
        Ok(document
            .map(|document| TimedRecord::parse_list(document.data.get(&self.config.list_field)))
            .unwrap_or_default())
    }

    /// 旧値を完全一致で取り除いてから新しい値を追加する
    async fn replace_record(&self, uid: &UserId, old: &Value, new: Value) -> Result<(), AppError> {
        let field = self.config.list_field.clone();
        self.remote
            .update_fields(
                &self.users_collection,
                uid.as_str(),
                vec![(field.clone(), FieldUpdate::ArrayRemove(vec![old.clone()]))],
            )
            .await?;
        self.remote
            .update_fields(
                &self.users_collection,
                uid.as_str(),
                vec![(field, FieldUpdate::ArrayUnion(vec![new]))],
            )
            .await
    }

    async fn run_pass(
        &self,
        uid: &UserId,
        worker: &IdentityWorker,
    ) -> Result<ReconcileOutcome, AppError> {
        if worker
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconciliation for {} already in flight; skipping", uid);
            return Ok(ReconcileOutcome::Skipped);
        }
        let _guard = InFlightGuard(&worker.in_flight);

        if !worker.is_alive() {
            return Ok(ReconcileOutcome::Skipped);
        }

        // 通知のスナップショットではなく毎回読み直す
        let records = match self.read_records(uid).await {
            Ok(records) => records,
            Err(err) => {
                self.passes.record_failure();
                return Err(err);
            }
        };
        let now = self.clock.now();
        let ready: Vec<TimedRecord> = records
            .into_iter()
            .filter(|record| record.is_ready_to_complete(now))
            .collect();

        let mut completed = 0;
        for record in ready {
            if !worker.is_alive() {
                debug!("Stopping reconciliation for {}; subscription released", uid);
                break;
            }
            match self
                .replace_record(uid, record.raw(), record.completed_value(now))
                .await
            {
                Ok(()) => {
                    completed += 1;
                    info!("Timed record {} completed for {}", record.id, uid);
                }
                Err(err) => {
                    warn!("Failed to complete timed record {} for {}: {}", record.id, uid, err);
                }
            }
        }

        self.passes.record_success();
        Ok(ReconcileOutcome::Completed(completed))
    }
}

async fn run_worker(
    inner: Arc<ProcessorInner>,
    uid: UserId,
    worker: Arc<IdentityWorker>,
    mut listener: DocumentListener,
    mut stop: oneshot::Receiver<()>,
    on_records: RecordsCallback,
) {
    let mut sweep = tokio::time::interval(Duration::from_secs(
        inner.config.sweep_interval_secs.max(1),
    ));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 初回 tick は即時に完了するので捨てる（購読直後のスナップショットで照合される）
    sweep.tick().await;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            snapshot = listener.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!("Document listener for {} closed", uid);
                    break;
                };
                if !worker.is_alive() {
                    break;
                }
                let records = snapshot
                    .map(|document| TimedRecord::parse_list(document.data.get(&inner.config.list_field)))
                    .unwrap_or_default();
                on_records(dedup_and_sort(records));
                if let Err(err) = inner.run_pass(&uid, &worker).await {
                    warn!("Reconciliation for {} failed: {}", uid, err);
                }
            }
            _ = sweep.tick() => {
                if !worker.is_alive() {
                    break;
                }
                if let Err(err) = inner.run_pass(&uid, &worker).await {
                    warn!("Periodic reconciliation for {} failed: {}", uid, err);
                }
            }
        }
    }
    debug!("Timed record worker for {} stopped", uid);
}
