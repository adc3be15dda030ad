use crate::domain::timestamp::parse_timestamp;
use crate::domain::value_objects::CalendarDate;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

pub const COINS_FIELD: &str = "coins";
pub const LAST_REWARD_DATE_FIELD: &str = "lastDailyRewardDate";
pub const LAST_REWARD_TIMESTAMP_FIELD: &str = "lastDailyRewardTimestamp";
pub const NEW_USER_FIELD: &str = "newUser";
pub const LAST_HOROSCOPE_REQUEST_FIELD: &str = "lastHoroscopeAIRequest";
pub const LAST_HOROSCOPE_RESPONSE_FIELD: &str = "lastHoroscopeAIResponse";

/// ユーザー文書のうち日次報酬に関わる部分
#[derive(Debug, Clone, PartialEq)]
pub struct UserRewardState {
    pub last_reward_date: CalendarDate,
    pub coin_balance: i64,
    /// サーバー時刻。判定には使わず異常検知のみに使う
    pub last_reward_at: Option<DateTime<Utc>>,
}

impl UserRewardState {
    /// 解釈できない日付は未受け取り扱い。次の受け取りで正しい値に上書きされる
    pub fn from_document(data: &Map<String, Value>) -> Self {
        let (last_reward_date, invalid) = CalendarDate::from_stored_lenient(
            data.get(LAST_REWARD_DATE_FIELD).and_then(Value::as_str),
        );
        if let Some(err) = invalid {
            warn!("Treating unreadable {} as never claimed: {}", LAST_REWARD_DATE_FIELD, err);
        }
        let coin_balance = data
            .get(COINS_FIELD)
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0);
        let last_reward_at = data
            .get(LAST_REWARD_TIMESTAMP_FIELD)
            .and_then(parse_timestamp);

        Self {
            last_reward_date,
            coin_balance,
            last_reward_at,
        }
    }
}

/// 報酬の整合性チェック結果。判定はせず、報告のみ行う
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardSecurityReport {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl RewardSecurityReport {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn suspicious(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn evaluate(state: &UserRewardState, now: DateTime<Utc>) -> Self {
        match state.last_reward_at {
            Some(at) if at > now => Self::suspicious(format!(
                "last reward timestamp {} is in the future (now {})",
                at.to_rfc3339(),
                now.to_rfc3339()
            )),
            _ => Self::valid(),
        }
    }
}

/// 1日1回の AI 星占いリクエスト可否
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRequestStatus {
    pub can_request: bool,
    pub last_response: Option<String>,
}

impl DailyRequestStatus {
    /// 保存値が本日の日付と異なれば（欠落を含む）リクエスト可
    pub fn from_document(data: Option<&Map<String, Value>>, today: CalendarDate) -> Self {
        let last_request = data
            .and_then(|d| d.get(LAST_HOROSCOPE_REQUEST_FIELD))
            .and_then(Value::as_str)
            .map(str::trim);
        let last_response = data
            .and_then(|d| d.get(LAST_HOROSCOPE_RESPONSE_FIELD))
            .and_then(Value::as_str)
            .map(str::to_string);

        let today = today.to_string();
        Self {
            can_request: last_request != Some(today.as_str()),
            last_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_fields_default_to_never_and_zero() {
        let state = UserRewardState::from_document(&Map::new());
        assert!(state.last_reward_date.is_never());
        assert_eq!(state.coin_balance, 0);
        assert!(state.last_reward_at.is_none());
    }

    #[test]
    fn malformed_date_is_treated_as_never_claimed() {
        let data = map(json!({ "coins": 10, "lastDailyRewardDate": "2024/01/01" }));
        let state = UserRewardState::from_document(&data);
        assert!(state.last_reward_date.is_never());
        assert_eq!(state.coin_balance, 10);
    }

    #[test]
    fn future_server_timestamp_is_flagged() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let data = map(json!({
            "coins": 300,
            "lastDailyRewardDate": "2024-01-02",
            "lastDailyRewardTimestamp": "2024-01-03T00:00:00Z"
        }));
        let state = UserRewardState::from_document(&data);
        let report = RewardSecurityReport::evaluate(&state, now);
        assert!(!report.is_valid);
        assert!(report.reason.is_some());

        let data = map(json!({ "lastDailyRewardTimestamp": "2024-01-02T11:00:00Z" }));
        let state = UserRewardState::from_document(&data);
        assert!(RewardSecurityReport::evaluate(&state, now).is_valid);
    }

    #[test]
    fn daily_request_status_compares_with_today() {
        let today = CalendarDate::parse("2024-01-02").unwrap();
        let data = map(json!({
            "lastHoroscopeAIRequest": "2024-01-02",
            "lastHoroscopeAIResponse": "Bugün şanslısın"
        }));
        let status = DailyRequestStatus::from_document(Some(&data), today);
        assert!(!status.can_request);
        assert_eq!(status.last_response.as_deref(), Some("Bugün şanslısın"));

        let status = DailyRequestStatus::from_document(None, today);
        assert!(status.can_request);
        assert!(status.last_response.is_none());
    }
}
