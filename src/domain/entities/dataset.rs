use crate::domain::value_objects::DatasetKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// データの出どころ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Cache,
    Remote,
    BundledFallback,
    /// どの層からも取得できなかった
    Unavailable,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Cache => "cache",
            DataSource::Remote => "remote",
            DataSource::BundledFallback => "bundled_fallback",
            DataSource::Unavailable => "unavailable",
        }
    }
}

/// データセットキーとリモートコレクションの対応
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub key: DatasetKey,
    pub collection: String,
}

impl DatasetSpec {
    pub fn new(key: DatasetKey, collection: impl Into<String>) -> Self {
        Self {
            key,
            collection: collection.into(),
        }
    }

    /// アプリが扱う参照データセット一式
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(DatasetKey::signs(), "signs"),
            Self::new(DatasetKey::seers(), "seer"),
            Self::new(DatasetKey::tarots(), "tarots"),
        ]
    }
}

/// あるデータセットの現在値（メモリ上の表示状態）
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSnapshot {
    pub key: DatasetKey,
    pub documents: Vec<Value>,
    pub source: DataSource,
    /// 差し替えのたびに増える
    pub revision: u64,
    pub error: Option<String>,
}

impl DatasetSnapshot {
    pub fn empty(key: DatasetKey) -> Self {
        Self {
            key,
            documents: Vec::new(),
            source: DataSource::Unavailable,
            revision: 0,
            error: None,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.documents.is_empty()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.documents
            .iter()
            .cloned()
            .map(serde_json::from_value)
            .collect()
    }
}

/// `load` / `refresh` の呼び出し結果
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetLoad<T> {
    pub data: Vec<T>,
    pub source: DataSource,
    pub error: Option<String>,
}

impl<T> DatasetLoad<T> {
    pub fn is_unavailable(&self) -> bool {
        self.source == DataSource::Unavailable
    }
}
