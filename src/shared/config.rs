use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DATA_DIR_NAME: &str = "hexpresso";
const DATABASE_FILE: &str = "hexpresso.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub datasets: DatasetConfig,
    pub rewards: RewardConfig,
    pub timed_records: TimedRecordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

/// 背景再検証で参照する "should update" フラグの場所
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub update_flag_collection: String,
    pub update_flag_document: String,
    pub update_flag_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub users_collection: String,
    pub daily_amount: i64,
    pub initial_coins: i64,
    #[serde(default = "default_true")]
    pub validate_server_timestamp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedRecordConfig {
    pub list_field: String,
    pub sweep_interval_secs: u64,
    pub speed_up_secs: u64,
    /// 購読に失敗したときの再試行間隔
    #[serde(default = "default_resubscribe_secs")]
    pub resubscribe_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            datasets: DatasetConfig::default(),
            rewards: RewardConfig::default(),
            timed_records: TimedRecordConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: 5,
            connection_timeout: 30,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            update_flag_collection: "settings".to_string(),
            update_flag_document: "update".to_string(),
            update_flag_field: "update".to_string(),
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            users_collection: "users".to_string(),
            daily_amount: 100,
            initial_coins: 250,
            validate_server_timestamp: true,
        }
    }
}

impl Default for TimedRecordConfig {
    fn default() -> Self {
        Self {
            list_field: "fortunerecord".to_string(),
            sweep_interval_secs: 30,
            speed_up_secs: 120,
            resubscribe_secs: default_resubscribe_secs(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        // 既定値
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("HEXPRESSO_DATABASE_URL") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.database.url = trimmed.to_string();
            }
        }
        if let Some(value) = env_u64("HEXPRESSO_DB_MAX_CONNECTIONS") {
            cfg.database.max_connections = value.clamp(1, u32::MAX as u64) as u32;
        }

        if let Some(value) = env_i64("HEXPRESSO_DAILY_REWARD_AMOUNT") {
            cfg.rewards.daily_amount = value.max(0);
        }
        if let Some(value) = env_i64("HEXPRESSO_INITIAL_COINS") {
            cfg.rewards.initial_coins = value.max(0);
        }
        if let Ok(v) = std::env::var("HEXPRESSO_VALIDATE_REWARD_TIMESTAMP") {
            cfg.rewards.validate_server_timestamp =
                parse_bool(&v, cfg.rewards.validate_server_timestamp);
        }

        if let Some(value) = env_u64("HEXPRESSO_SWEEP_INTERVAL_SECS") {
            cfg.timed_records.sweep_interval_secs = value.max(1);
        }
        if let Some(value) = env_u64("HEXPRESSO_RESUBSCRIBE_SECS") {
            cfg.timed_records.resubscribe_secs = value.max(1);
        }
        if let Some(value) = env_u64("HEXPRESSO_SPEED_UP_SECS") {
            cfg.timed_records.speed_up_secs = value;
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.trim().is_empty() {
            return Err("Database url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.datasets.update_flag_collection.trim().is_empty()
            || self.datasets.update_flag_document.trim().is_empty()
            || self.datasets.update_flag_field.trim().is_empty()
        {
            return Err("Dataset update flag location must be fully specified".to_string());
        }
        if self.rewards.users_collection.trim().is_empty() {
            return Err("Rewards users_collection must not be empty".to_string());
        }
        if self.rewards.daily_amount <= 0 {
            return Err("Rewards daily_amount must be greater than 0".to_string());
        }
        if self.rewards.initial_coins < 0 {
            return Err("Rewards initial_coins must not be negative".to_string());
        }
        if self.timed_records.list_field.trim().is_empty() {
            return Err("Timed records list_field must not be empty".to_string());
        }
        if self.timed_records.sweep_interval_secs == 0 {
            return Err("Timed records sweep_interval_secs must be greater than 0".to_string());
        }
        if self.timed_records.resubscribe_secs == 0 {
            return Err("Timed records resubscribe_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// 端末ローカルのデータディレクトリ（取得できない場合はカレント配下）
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_database_url() -> String {
    let path = default_data_dir().join(DATABASE_FILE);
    format!("sqlite://{}?mode=rwc", path.display())
}

fn default_true() -> bool {
    true
}

fn default_resubscribe_secs() -> u64 {
    5
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| parse_u64(&v))
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| parse_i64(&v))
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_i64(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rewards.daily_amount, 100);
        assert_eq!(cfg.rewards.initial_coins, 250);
        assert_eq!(cfg.timed_records.sweep_interval_secs, 30);
        assert_eq!(cfg.timed_records.speed_up_secs, 120);
        assert!(cfg.database.url.ends_with("hexpresso.db?mode=rwc"));
    }

    #[test]
    fn validate_rejects_zero_reward() {
        let mut cfg = AppConfig::default();
        cfg.rewards.daily_amount = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_flag_location() {
        let mut cfg = AppConfig::default();
        cfg.datasets.update_flag_field = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_bool_falls_back_to_default() {
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("maybe", true));
    }
}
