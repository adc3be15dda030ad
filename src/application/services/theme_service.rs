use crate::application::ports::KeyValueStore;
use crate::domain::value_objects::Theme;
use crate::shared::error::AppError;
use std::sync::Arc;
use tracing::warn;

pub const THEME_NAMESPACE: &str = "theme_preferences";
pub const THEME_KEY: &str = "theme";

/// 端末ローカルのテーマ設定
pub struct ThemeService {
    store: Arc<dyn KeyValueStore>,
}

impl ThemeService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 保存済みのテーマを返す。未保存・不正値なら既定値を保存して返す
    pub async fn load_theme(&self, default: Theme) -> Result<Theme, AppError> {
        if let Some(raw) = self.store.get(THEME_NAMESPACE, THEME_KEY).await? {
            match raw.parse::<Theme>() {
                Ok(theme) => return Ok(theme),
                Err(err) => warn!("Ignoring stored theme preference: {}", err),
            }
        }
        self.update_theme(default).await?;
        Ok(default)
    }

    pub async fn update_theme(&self, theme: Theme) -> Result<(), AppError> {
        self.store
            .set(THEME_NAMESPACE, THEME_KEY, theme.as_str())
            .await
    }

    pub async fn toggle(&self) -> Result<Theme, AppError> {
        let next = self.load_theme(Theme::default()).await?.toggled();
        self.update_theme(next).await?;
        Ok(next)
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.store.clear(THEME_NAMESPACE).await
    }
}
