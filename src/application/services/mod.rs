pub mod daily_request_gate;
pub mod daily_reward_service;
pub mod freshness_reconciler;
pub mod session_service;
pub mod theme_service;
pub mod timed_record_processor;

pub use daily_request_gate::DailyRequestGate;
pub use daily_reward_service::DailyRewardService;
pub use freshness_reconciler::{DatasetHandle, FreshnessReconciler, ReconcilerMetricsSnapshot};
pub use session_service::SessionService;
pub use theme_service::ThemeService;
pub use timed_record_processor::{ReconcileOutcome, RecordsCallback, TimedRecordProcessor};
