use crate::domain::timestamp::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

pub const STATUS_FIELD: &str = "status";
pub const SCHEDULED_COMPLETION_FIELD: &str = "estimatedCompletionTime";
pub const RESULT_FIELD: &str = "result";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const COMPLETED_AT_FIELD: &str = "completedAt";
pub const RESPONSE_TIME_FIELD: &str = "responseTime";
pub const SPEED_UP_USED_FIELD: &str = "speedUpUsed";

/// 1件あたりの早送り上限回数
pub const MAX_SPEED_UPS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Processing,
    Completed,
    #[serde(other)]
    Unknown,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Processing => "processing",
            RecordStatus::Completed => "completed",
            RecordStatus::Unknown => "unknown",
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("pending") => RecordStatus::Pending,
            Some("processing") => RecordStatus::Processing,
            Some("completed") => RecordStatus::Completed,
            _ => RecordStatus::Unknown,
        }
    }
}

/// ユーザー文書のリストフィールドに埋め込まれた時限レコード
///
/// 配列要素の削除は値の完全一致で行うため、読み取った元の値を `raw` に保持する。
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRecord {
    pub id: String,
    pub status: RecordStatus,
    pub scheduled_completion_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub response_time_minutes: Option<i64>,
    pub speed_up_used: u64,
    raw: Value,
}

impl TimedRecord {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| "Timed record must be an object".to_string())?;
        let id = match map.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err("Timed record is missing an id".to_string()),
        };

        Ok(Self {
            id,
            status: RecordStatus::from_value(map.get(STATUS_FIELD)),
            scheduled_completion_at: map.get(SCHEDULED_COMPLETION_FIELD).and_then(parse_timestamp),
            result: map.get(RESULT_FIELD).filter(|v| !v.is_null()).cloned(),
            created_at: map.get(CREATED_AT_FIELD).and_then(parse_timestamp),
            response_time_minutes: map.get(RESPONSE_TIME_FIELD).and_then(Value::as_i64),
            speed_up_used: map
                .get(SPEED_UP_USED_FIELD)
                .and_then(Value::as_u64)
                .unwrap_or(0),
            raw: value.clone(),
        })
    }

    /// リストフィールド全体を解釈する。壊れた要素は読み飛ばす
    pub fn parse_list(value: Option<&Value>) -> Vec<TimedRecord> {
        value
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match TimedRecord::from_value(item) {
                        Ok(record) => Some(record),
                        Err(err) => {
                            tracing::warn!(error = %err, "Skipping malformed timed record");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
    }

    pub fn has_result(&self) -> bool {
        match &self.result {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Bool(flag)) => *flag,
            Some(_) => true,
        }
    }

    /// pending かつ期限到来かつ結果あり
    pub fn is_ready_to_complete(&self, now: DateTime<Utc>) -> bool {
        self.is_pending()
            && self.has_result()
            && self
                .scheduled_completion_at
                .map(|at| at <= now)
                .unwrap_or(false)
    }

    /// 完了状態に置き換える値
    pub fn completed_value(&self, now: DateTime<Utc>) -> Value {
        let mut value = self.raw.clone();
        if let Some(map) = value.as_object_mut() {
            map.insert(
                STATUS_FIELD.to_string(),
                Value::String(RecordStatus::Completed.as_str().to_string()),
            );
            map.insert(COMPLETED_AT_FIELD.to_string(), format_timestamp(now));
        }
        value
    }

    /// 完了予定を `shift` だけ早めた値。pending 以外・予定時刻なし・上限到達時は None
    pub fn sped_up_value(&self, shift: Duration, now: DateTime<Utc>) -> Option<Value> {
        if !self.is_pending() || self.speed_up_used >= MAX_SPEED_UPS {
            return None;
        }
        let scheduled = self.scheduled_completion_at?;
        let new_completion = scheduled - shift;
        let response_time = remaining_minutes(new_completion, now);

        let mut value = self.raw.clone();
        let map = value.as_object_mut()?;
        map.insert(
            SCHEDULED_COMPLETION_FIELD.to_string(),
            format_timestamp(new_completion),
        );
        map.insert(RESPONSE_TIME_FIELD.to_string(), Value::from(response_time));
        map.insert(
            SPEED_UP_USED_FIELD.to_string(),
            Value::from(self.speed_up_used + 1),
        );
        Some(value)
    }
}

/// 残り時間を分単位で切り上げる（最小 1 分）
pub fn remaining_minutes(completion: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (completion - now).num_milliseconds();
    let minutes = if millis <= 0 {
        0
    } else {
        (millis + 59_999) / 60_000
    };
    minutes.max(1)
}

/// id 重複を除き、作成日時の新しい順に並べる
pub fn dedup_and_sort(records: Vec<TimedRecord>) -> Vec<TimedRecord> {
    let mut seen = HashSet::new();
    let mut unique: Vec<TimedRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .collect();
    unique.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    unique
}
