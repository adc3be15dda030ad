use crate::application::ports::IdentityProvider;
use crate::domain::entities::Identity;
use tokio::sync::watch;
use tracing::info;

/// 認証基盤からの通知をチャネルで中継する
pub struct ChannelIdentityProvider {
    sender: watch::Sender<Option<Identity>>,
}

impl ChannelIdentityProvider {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!("Identity signed in: {}", identity.uid);
        self.sender.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.sender.send_replace(None) {
            info!("Identity signed out: {}", previous.uid);
        }
    }
}

impl Default for ChannelIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for ChannelIdentityProvider {
    fn current_identity(&self) -> Option<Identity> {
        self.sender.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::UserId;

    #[tokio::test]
    async fn test_watchers_observe_sign_in_and_out() {
        let provider = ChannelIdentityProvider::new();
        let mut rx = provider.watch();
        assert!(provider.current_identity().is_none());

        provider.sign_in(Identity::first_session(UserId::parse("u1").unwrap()));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|i| i.uid.as_str().to_string()),
            Some("u1".to_string())
        );

        provider.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
