use crate::application::ports::{BundledDatasets, Clock, IdentityProvider, RemoteDocumentStore};
use crate::application::services::{
    DailyRequestGate, DailyRewardService, FreshnessReconciler, SessionService, ThemeService,
    TimedRecordProcessor,
};
use crate::domain::entities::DatasetSpec;
use crate::infrastructure::{BundledCatalog, ConnectionPool, SqliteKeyValueStore, SystemClock};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 外部から差し込む協調者
pub struct AppCollaborators {
    pub remote: Arc<dyn RemoteDocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
    pub bundled: Arc<dyn BundledDatasets>,
}

impl AppCollaborators {
    /// 端末時計と同梱カタログを使う
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            remote,
            identity,
            clock: Arc::new(SystemClock),
            bundled: Arc::new(BundledCatalog::embedded()?),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bundled(mut self, bundled: Arc<dyn BundledDatasets>) -> Self {
        self.bundled = bundled;
        self
    }
}

/// アプリケーション全体の状態を管理する構造体
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: ConnectionPool,
    pub cache_store: Arc<SqliteKeyValueStore>,
    pub remote: Arc<dyn RemoteDocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
    pub reconciler: Arc<FreshnessReconciler>,
    pub rewards: Arc<DailyRewardService>,
    pub request_gate: Arc<DailyRequestGate>,
    pub timed_records: Arc<TimedRecordProcessor>,
    pub theme: Arc<ThemeService>,
    pub session: Arc<SessionService>,
}

impl AppState {
    pub async fn initialize(
        config: AppConfig,
        collaborators: AppCollaborators,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;
        ensure_database_dir(&config.database.url)?;

        let db_pool = ConnectionPool::from_config(&config.database).await?;
        db_pool.migrate().await?;
        let cache_store = Arc::new(SqliteKeyValueStore::new(db_pool.clone()));

        let AppCollaborators {
            remote,
            identity,
            clock,
            bundled,
        } = collaborators;

        let reconciler = Arc::new(FreshnessReconciler::new(
            cache_store.clone(),
            Arc::clone(&remote),
            bundled,
            config.datasets.clone(),
            DatasetSpec::defaults(),
        ));
        let rewards = Arc::new(DailyRewardService::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            config.rewards.clone(),
        ));
        let request_gate = Arc::new(DailyRequestGate::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            &config.rewards,
        ));
        let timed_records = Arc::new(TimedRecordProcessor::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            config.rewards.users_collection.clone(),
            config.timed_records.clone(),
        ));
        let theme = Arc::new(ThemeService::new(cache_store.clone()));
        let session = Arc::new(
            SessionService::new(
                Arc::clone(&identity),
                Arc::clone(&rewards),
                Arc::clone(&timed_records),
                Arc::clone(&reconciler),
            )
            .with_resubscribe_interval(Duration::from_secs(config.timed_records.resubscribe_secs)),
        );
        session.start().await;

        info!("Application state initialized");
        Ok(Self {
            config,
            db_pool,
            cache_store,
            remote,
            identity,
            clock,
            reconciler,
            rewards,
            request_gate,
            timed_records,
            theme,
            session,
        })
    }

    /// バックグラウンド処理を止めて DB を閉じる
    pub async fn shutdown(&self) {
        self.session.stop().await;
        self.timed_records.shutdown().await;
        self.reconciler.shutdown().await;
        self.db_pool.close().await;
        info!("Application state shut down");
    }
}

/// ファイル DB の親ディレクトリを作成する
fn ensure_database_dir(url: &str) -> Result<(), AppError> {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }
    }
    Ok(())
}
