pub mod catalog;
pub mod dataset;
pub mod identity;
pub mod reward;
pub mod timed_record;

pub use catalog::{Seer, TarotCard, ZodiacSignEntry};
pub use dataset::{DataSource, DatasetLoad, DatasetSnapshot, DatasetSpec};
pub use identity::Identity;
pub use reward::{DailyRequestStatus, RewardSecurityReport, UserRewardState};
pub use timed_record::{RecordStatus, TimedRecord};
