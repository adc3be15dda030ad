use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const SIGNS_DATA: &str = "signs_data";
pub const SEERS_DATA: &str = "seers_data";
pub const TAROTS_DATA: &str = "tarots_data";

/// キャッシュ/リモートのデータセットを識別する論理名（ローカルストアの namespace を兼ねる）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetKey(String);

impl DatasetKey {
    pub fn new(value: String) -> Result<Self, String> {
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        Self::validate(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn signs() -> Self {
        Self(SIGNS_DATA.to_string())
    }

    pub fn seers() -> Self {
        Self(SEERS_DATA.to_string())
    }

    pub fn tarots() -> Self {
        Self(TAROTS_DATA.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err("Dataset key cannot be empty".to_string());
        }
        if value.len() > 64 {
            return Err("Dataset key is too long".to_string());
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("Dataset key contains invalid characters: {value}"));
        }
        Ok(())
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DatasetKey> for String {
    fn from(key: DatasetKey) -> Self {
        key.0
    }
}

impl TryFrom<String> for DatasetKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for DatasetKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
