use crate::application::ports::{Clock, FieldUpdate, RemoteDocumentStore};
use crate::domain::entities::reward::{
    COINS_FIELD, LAST_REWARD_DATE_FIELD, LAST_REWARD_TIMESTAMP_FIELD, NEW_USER_FIELD,
};
use crate::domain::entities::{RewardSecurityReport, UserRewardState};
use crate::domain::value_objects::{CalendarDate, DailyWindow, UserId};
use crate::shared::config::RewardConfig;
use crate::shared::error::AppError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 1日1回のログイン報酬
pub struct DailyRewardService {
    remote: Arc<dyn RemoteDocumentStore>,
    clock: Arc<dyn Clock>,
    config: RewardConfig,
}

impl DailyRewardService {
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<dyn Clock>,
        config: RewardConfig,
    ) -> Self {
        Self {
            remote,
            clock,
            config,
        }
    }

    pub fn daily_amount(&self) -> i64 {
        self.config.daily_amount
    }

    /// 本日まだ受け取っていなければ true。書き込みは行わない
    pub async fn check_eligibility(&self, uid: &UserId) -> bool {
        match self.evaluate(uid).await {
            Ok(Some((_, window))) => window.is_open(),
            Ok(None) => false,
            Err(err) => {
                error!("Daily reward check failed for {}: {}", uid, err);
                false
            }
        }
    }

    /// 受け取り処理。付与した場合のみ true
    ///
    /// 読み取りと書き込みの間にロックは取らないため、同時に 2 回呼ばれると
    /// 両方が付与に成功しうる。
    pub async fn claim(&self, uid: &UserId) -> bool {
        match self.try_claim(uid).await {
            Ok(granted) => granted,
            Err(err) => {
                error!("Daily reward claim failed for {}: {}", uid, err);
                false
            }
        }
    }

    /// 受け取り可能なら続けて受け取る
    pub async fn auto_claim(&self, uid: &UserId) -> bool {
        if !self.check_eligibility(uid).await {
            return false;
        }
        self.claim(uid).await
    }

    /// 最終受け取りのサーバー時刻が未来になっていないか確認する。取得失敗時は valid 扱い
    pub async fn validate_security(&self, uid: &UserId) -> RewardSecurityReport {
        if !self.config.validate_server_timestamp {
            return RewardSecurityReport::valid();
        }
        let state = match self.read_state(uid).await {
            Ok(Some(state)) => state,
            Ok(None) => return RewardSecurityReport::valid(),
            Err(err) => {
                error!("Reward security validation failed for {}: {}", uid, err);
                return RewardSecurityReport::valid();
            }
        };

        let report = RewardSecurityReport::evaluate(&state, self.clock.now());
        if let Some(reason) = &report.reason {
            warn!("Suspicious daily reward state for {}: {}", uid, reason);
        }
        report
    }

    /// 新規アカウントの報酬関連フィールドを初期化する
    pub async fn bootstrap_account(&self, uid: &UserId) -> Result<(), AppError> {
        let mut data = Map::new();
        data.insert(COINS_FIELD.to_string(), Value::from(self.config.initial_coins));
        data.insert(
            LAST_REWARD_DATE_FIELD.to_string(),
            Value::String(CalendarDate::never().to_string()),
        );
        data.insert(NEW_USER_FIELD.to_string(), Value::Bool(true));

        self.remote
            .merge_set(&self.config.users_collection, uid.as_str(), data)
            .await?;
        info!(
            "Bootstrapped account {} with {} coins",
            uid, self.config.initial_coins
        );
        Ok(())
    }

    async fn try_claim(&self, uid: &UserId) -> Result<bool, AppError> {
        let Some((today, window)) = self.evaluate(uid).await? else {
            debug!("No user document for {}; skipping daily reward", uid);
            return Ok(false);
        };

        match window {
            DailyWindow::Open => {}
            DailyWindow::UsedToday => {
                debug!("Daily reward already claimed today by {}", uid);
                return Ok(false);
            }
            DailyWindow::StoredInFuture => {
                warn!(
                    "Stored reward date for {} is after {}; device clock may have moved back",
                    uid, today
                );
                return Ok(false);
            }
        }

        self.remote
            .update_fields(
                &self.config.users_collection,
                uid.as_str(),
                vec![
                    (
                        COINS_FIELD.to_string(),
                        FieldUpdate::Increment(self.config.daily_amount),
                    ),
                    (
                        LAST_REWARD_DATE_FIELD.to_string(),
                        FieldUpdate::Set(Value::String(today.to_string())),
                    ),
                    (
                        LAST_REWARD_TIMESTAMP_FIELD.to_string(),
                        FieldUpdate::ServerTimestamp,
                    ),
                ],
            )
            .await?;

        info!(
            "Daily reward claimed: {} coins added for {} on {}",
            self.config.daily_amount, uid, today
        );
        Ok(true)
    }

    async fn evaluate(
        &self,
        uid: &UserId,
    ) -> Result<Option<(CalendarDate, DailyWindow)>, AppError> {
        let Some(state) = self.read_state(uid).await? else {
            return Ok(None);
        };
        let today = self.clock.today();
        Ok(Some((today, DailyWindow::evaluate(state.last_reward_date, today))))
    }

    async fn read_state(&self, uid: &UserId) -> Result<Option<UserRewardState>, AppError> {
        let document = self
            .remote
            .get_document(&self.config.users_collection, uid.as_str())
            .await?;
        Ok(document.map(|document| UserRewardState::from_document(&document.data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{DocumentListener, RemoteDocument};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Remote {}

        #[async_trait]
        impl RemoteDocumentStore for Remote {
            async fn get_document(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>, AppError>;
            async fn list_collection(&self, collection: &str) -> Result<Vec<RemoteDocument>, AppError>;
            async fn update_fields(&self, collection: &str, id: &str, updates: Vec<(String, FieldUpdate)>) -> Result<(), AppError>;
            async fn merge_set(&self, collection: &str, id: &str, data: Map<String, Value>) -> Result<(), AppError>;
            async fn subscribe_document(&self, collection: &str, id: &str) -> Result<DocumentListener, AppError>;
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn today(&self) -> CalendarDate {
            CalendarDate::from_naive(self.0.date_naive())
        }
    }

    fn service(remote: MockRemote) -> DailyRewardService {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
        DailyRewardService::new(Arc::new(remote), Arc::new(clock), RewardConfig::default())
    }

    fn user_doc(value: Value) -> Option<RemoteDocument> {
        Some(RemoteDocument::new("u1", value.as_object().cloned().unwrap()))
    }

    fn uid() -> UserId {
        UserId::parse("u1").unwrap()
    }

    #[tokio::test]
    async fn test_claim_writes_single_atomic_update() {
        let mut remote = MockRemote::new();
        remote
            .expect_get_document()
            .withf(|collection, id| collection == "users" && id == "u1")
            .returning(|_, _| Ok(user_doc(json!({ "coins": 250, "lastDailyRewardDate": "2024-01-01" }))));
        remote
            .expect_update_fields()
            .withf(|collection, id, updates| {
                collection == "users"
                    && id == "u1"
                    && updates
                        == &vec![
                            ("coins".to_string(), FieldUpdate::Increment(100)),
                            (
                                "lastDailyRewardDate".to_string(),
                                FieldUpdate::Set(json!("2024-01-02")),
                            ),
                            (
                                "lastDailyRewardTimestamp".to_string(),
                                FieldUpdate::ServerTimestamp,
                            ),
                        ]
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        assert!(service(remote).claim(&uid()).await);
    }

    #[tokio::test]
    async fn test_claim_same_day_is_noop() {
        let mut remote = MockRemote::new();
        remote
            .expect_get_document()
            .returning(|_, _| Ok(user_doc(json!({ "coins": 350, "lastDailyRewardDate": "2024-01-02" }))));
        remote.expect_update_fields().never();

        let service = service(remote);
        assert!(!service.check_eligibility(&uid()).await);
        assert!(!service.claim(&uid()).await);
        assert!(!service.auto_claim(&uid()).await);
    }

    #[tokio::test]
    async fn test_unreadable_stored_date_still_grants_and_overwrites() {
        let mut remote = MockRemote::new();
        remote
            .expect_get_document()
            .returning(|_, _| Ok(user_doc(json!({ "coins": 10, "lastDailyRewardDate": "2024/01/01" }))));
        remote
            .expect_update_fields()
            .withf(|_, _, updates| {
                updates.contains(&(
                    "lastDailyRewardDate".to_string(),
                    FieldUpdate::Set(json!("2024-01-02")),
                ))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service(remote);
        assert!(service.check_eligibility(&uid()).await);
        assert!(service.claim(&uid()).await);
    }

    #[tokio::test]
    async fn test_future_stored_date_is_refused() {
        let mut remote = MockRemote::new();
        remote
            .expect_get_document()
            .returning(|_, _| Ok(user_doc(json!({ "lastDailyRewardDate": "2024-02-01" }))));
        remote.expect_update_fields().never();

        assert!(!service(remote).claim(&uid()).await);
    }

    #[tokio::test]
    async fn test_missing_document_and_network_errors_return_false() {
        let mut missing = MockRemote::new();
        missing.expect_get_document().returning(|_, _| Ok(None));
        missing.expect_update_fields().never();
        let service_missing = service(missing);
        assert!(!service_missing.claim(&uid()).await);
        assert!(!service_missing.check_eligibility(&uid()).await);

        let mut offline = MockRemote::new();
        offline
            .expect_get_document()
            .returning(|_, _| Err(AppError::Network("offline".to_string())));
        offline.expect_update_fields().never();
        let service_offline = service(offline);
        assert!(!service_offline.claim(&uid()).await);
        assert!(service_offline.validate_security(&uid()).await.is_valid);
    }

    #[tokio::test]
    async fn test_validate_security_flags_future_timestamp() {
        let mut remote = MockRemote::new();
        remote.expect_get_document().returning(|_, _| {
            Ok(user_doc(json!({
                "lastDailyRewardDate": "2024-01-02",
                "lastDailyRewardTimestamp": "2024-01-05T00:00:00Z"
            })))
        });

        let report = service(remote).validate_security(&uid()).await;
        assert!(!report.is_valid);
    }

    #[tokio::test]
    async fn test_bootstrap_account_merges_initial_state() {
        let mut remote = MockRemote::new();
        remote
            .expect_merge_set()
            .withf(|collection, id, data| {
                collection == "users"
                    && id == "u1"
                    && data.get("coins") == Some(&json!(250))
                    && data.get("lastDailyRewardDate") == Some(&json!("1970-01-01"))
                    && data.get("newUser") == Some(&json!(true))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        service(remote).bootstrap_account(&uid()).await.unwrap();
    }
}
