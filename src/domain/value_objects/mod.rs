pub mod calendar_date;
pub mod dataset_key;
pub mod theme;
pub mod user_id;

pub use calendar_date::{CalendarDate, DailyWindow, NEVER_CLAIMED};
pub use dataset_key::DatasetKey;
pub use theme::Theme;
pub use user_id::UserId;
