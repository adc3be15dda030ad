use crate::application::ports::{Clock, RemoteDocumentStore};
use crate::domain::entities::DailyRequestStatus;
use crate::domain::entities::reward::{LAST_HOROSCOPE_REQUEST_FIELD, LAST_HOROSCOPE_RESPONSE_FIELD};
use crate::domain::value_objects::UserId;
use crate::shared::config::RewardConfig;
use crate::shared::error::AppError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// AI 星占いを 1 日 1 回に制限する
pub struct DailyRequestGate {
    remote: Arc<dyn RemoteDocumentStore>,
    clock: Arc<dyn Clock>,
    users_collection: String,
}

impl DailyRequestGate {
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<dyn Clock>,
        config: &RewardConfig,
    ) -> Self {
        Self {
            remote,
            clock,
            users_collection: config.users_collection.clone(),
        }
    }

    /// 本日リクエスト可能か。前回の応答も合わせて返す
    pub async fn can_request_today(&self, uid: &UserId) -> Result<DailyRequestStatus, AppError> {
        let document = self
            .remote
            .get_document(&self.users_collection, uid.as_str())
            .await?;
        let status =
            DailyRequestStatus::from_document(document.as_ref().map(|d| &d.data), self.clock.today());
        debug!("Horoscope request gate for {}: {:?}", uid, status.can_request);
        Ok(status)
    }

    /// 本日リクエスト済みとして記録する（文書が無ければ作成）
    pub async fn mark_requested_today(&self, uid: &UserId, response: &str) -> Result<(), AppError> {
        let mut data = Map::new();
        data.insert(
            LAST_HOROSCOPE_REQUEST_FIELD.to_string(),
            Value::String(self.clock.today().to_string()),
        );
        data.insert(
            LAST_HOROSCOPE_RESPONSE_FIELD.to_string(),
            Value::String(response.to_string()),
        );
        self.remote
            .merge_set(&self.users_collection, uid.as_str(), data)
            .await
    }
}
