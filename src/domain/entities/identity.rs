use crate::domain::value_objects::UserId;
use serde::{Deserialize, Serialize};

/// サインイン中の利用者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserId,
    /// アカウント作成直後の最初のセッションか
    pub is_first_session: bool,
}

impl Identity {
    pub fn new(uid: UserId) -> Self {
        Self {
            uid,
            is_first_session: false,
        }
    }

    pub fn first_session(uid: UserId) -> Self {
        Self {
            uid,
            is_first_session: true,
        }
    }
}
