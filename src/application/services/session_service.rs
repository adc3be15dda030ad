use crate::application::ports::IdentityProvider;
use crate::application::services::{
    DailyRewardService, FreshnessReconciler, RecordsCallback, TimedRecordProcessor,
};
use crate::domain::entities::{Identity, TimedRecord};
use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const DEFAULT_RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(5);

/// サインイン中の利用者と、その初期化・購読の進み具合
struct ActiveSession {
    uid: UserId,
    needs_bootstrap: bool,
    subscribed: bool,
}

impl ActiveSession {
    fn is_settled(&self) -> bool {
        self.subscribed && !self.needs_bootstrap
    }
}

/// サインイン状態の変化に合わせて購読とキャッシュを切り替える
pub struct SessionService {
    identity: Arc<dyn IdentityProvider>,
    rewards: Arc<DailyRewardService>,
    processor: Arc<TimedRecordProcessor>,
    reconciler: Arc<FreshnessReconciler>,
    records: Arc<watch::Sender<Vec<TimedRecord>>>,
    current: Mutex<Option<ActiveSession>>,
    task: Mutex<Option<JoinHandle<()>>>,
    resubscribe_interval: Duration,
}

impl SessionService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        rewards: Arc<DailyRewardService>,
        processor: Arc<TimedRecordProcessor>,
        reconciler: Arc<FreshnessReconciler>,
    ) -> Self {
        let (records, _) = watch::channel(Vec::new());
        Self {
            identity,
            rewards,
            processor,
            reconciler,
            records: Arc::new(records),
            current: Mutex::new(None),
            task: Mutex::new(None),
            resubscribe_interval: DEFAULT_RESUBSCRIBE_INTERVAL,
        }
    }

    /// 購読や初期化に失敗したときの再試行間隔
    pub fn with_resubscribe_interval(mut self, interval: Duration) -> Self {
        self.resubscribe_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub async fn current_user(&self) -> Option<UserId> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|session| session.uid.clone())
    }

    /// サインイン中の利用者の時限レコード（新しい順）
    pub fn records(&self) -> watch::Receiver<Vec<TimedRecord>> {
        self.records.subscribe()
    }

    /// 認証状態の監視を開始する
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let mut changes = self.identity.watch();
        let service = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut retry = tokio::time::interval(service.resubscribe_interval);
            retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let identity = changes.borrow_and_update().clone();
            let mut pending = !service.apply_logged(identity).await;
            retry.reset();

            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let identity = changes.borrow_and_update().clone();
                        pending = !service.apply_logged(identity).await;
                        retry.reset();
                    }
                    _ = retry.tick(), if pending => {
                        let identity = changes.borrow().clone();
                        pending = !service.apply_logged(identity).await;
                    }
                }
            }
        }));
    }

    /// 監視を止め、購読を解除する
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        self.processor.unsubscribe_all().await;
        *self.current.lock().await = None;
    }

    /// 利用者の切り替えを反映する
    ///
    /// 同じ利用者で呼び直すと、失敗していた初期化と購読だけをやり直す。
    pub async fn apply(&self, identity: Option<Identity>) -> Result<(), AppError> {
        let mut current = self.current.lock().await;
        let next = identity.as_ref().map(|identity| &identity.uid);
        let same_user = current.as_ref().map(|session| &session.uid) == next;

        if !same_user {
            if let Some(previous) = current.take() {
                self.processor.unsubscribe(&previous.uid).await;
                self.records.send_replace(Vec::new());
                if let Err(err) = self.reconciler.clear_all().await {
                    error!("Failed to clear dataset caches for {}: {}", previous.uid, err);
                }
                info!("Session ended for {}", previous.uid);
            }

            let Some(identity) = identity else {
                return Ok(());
            };
            *current = Some(ActiveSession {
                uid: identity.uid,
                needs_bootstrap: identity.is_first_session,
                subscribed: false,
            });
        }

        let Some(session) = current.as_mut() else {
            return Ok(());
        };
        if session.is_settled() {
            return Ok(());
        }

        if session.needs_bootstrap {
            match self.rewards.bootstrap_account(&session.uid).await {
                Ok(()) => session.needs_bootstrap = false,
                Err(err) => warn!("Failed to bootstrap account {}: {}", session.uid, err),
            }
        }

        if !session.subscribed {
            let records = Arc::clone(&self.records);
            let on_records: RecordsCallback = Arc::new(move |list: Vec<TimedRecord>| {
                records.send_replace(list);
            });
            self.processor.subscribe(&session.uid, on_records).await?;
            session.subscribed = true;
            info!("Session started for {}", session.uid);
        }

        if session.needs_bootstrap {
            return Err(AppError::Network(format!(
                "Account {} is not bootstrapped yet",
                session.uid
            )));
        }
        Ok(())
    }

    /// 反映できたら true
    async fn apply_logged(&self, identity: Option<Identity>) -> bool {
        match self.apply(identity).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "Failed to apply identity change (retrying in {:?}): {}",
                    self.resubscribe_interval, err
                );
                false
            }
        }
    }
}
