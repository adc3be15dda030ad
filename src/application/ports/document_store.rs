use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

pub type DocumentData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub data: DocumentData,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, data: DocumentData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// 文書 id を `id` フィールドとして含めたレコード値に変換する（本文側の `id` を優先）
    pub fn into_record(self) -> Value {
        let mut data = self.data;
        data.entry("id".to_string())
            .or_insert_with(|| Value::String(self.id));
        Value::Object(data)
    }
}

/// フィールド単位の原子的更新
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// 欠落フィールドは 0 とみなす
    Increment(i64),
    /// 等価な要素が無い場合のみ追加
    ArrayUnion(Vec<Value>),
    /// 等価な要素をすべて削除
    ArrayRemove(Vec<Value>),
    /// サーバー側の現在時刻
    ServerTimestamp,
}

/// 文書の変更通知。購読直後に現在のスナップショットが 1 件届く。
/// `None` は文書が存在しないことを表す。受信側を drop すると購読解除。
pub type DocumentListener = mpsc::Receiver<Option<RemoteDocument>>;

#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<RemoteDocument>, AppError>;

    async fn list_collection(&self, collection: &str) -> Result<Vec<RemoteDocument>, AppError>;

    /// 既存文書のフィールドを更新する。文書が無ければ `NotFound`
    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), AppError>;

    /// 文書が無ければ作成し、あればトップレベルのフィールドをマージする
    async fn merge_set(
        &self,
        collection: &str,
        id: &str,
        data: DocumentData,
    ) -> Result<(), AppError>;

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<DocumentListener, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn into_record_merges_document_id() {
        let data = json!({ "name": "Kova" }).as_object().cloned().unwrap();
        let record = RemoteDocument::new("aquarius", data).into_record();
        assert_eq!(record, json!({ "id": "aquarius", "name": "Kova" }));

        let data = json!({ "id": "custom" }).as_object().cloned().unwrap();
        let record = RemoteDocument::new("doc-1", data).into_record();
        assert_eq!(record["id"], "custom");
    }
}
