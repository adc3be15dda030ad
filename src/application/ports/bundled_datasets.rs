use crate::domain::value_objects::DatasetKey;
use serde_json::Value;

/// アプリに同梱された読み取り専用の既定データ
pub trait BundledDatasets: Send + Sync {
    /// 同梱データが無いキーは `None`
    fn fallback(&self, key: &DatasetKey) -> Option<Vec<Value>>;
}
