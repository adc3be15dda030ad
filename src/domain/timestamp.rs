use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// リモート文書に格納された時刻表現を解釈する
///
/// RFC3339 文字列、`{seconds, nanoseconds}` 形式のタイムスタンプ
/// （`_seconds` 接頭辞付きも可）、エポックミリ秒の数値を受け付ける。
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, nanos.min(999_999_999) as u32)
                .single()
        }
        _ => None,
    }
}

pub fn format_timestamp(value: DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339())
}
