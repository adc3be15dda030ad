use crate::domain::entities::Identity;
use tokio::sync::watch;

/// 認証基盤から現在の利用者を受け取る
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;

    /// サインイン/サインアウトを購読する。`None` は未サインイン
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
}
