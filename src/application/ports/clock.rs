use crate::domain::value_objects::CalendarDate;
use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 端末ローカルの暦日
    fn today(&self) -> CalendarDate;
}
