pub mod entities;
pub mod timestamp;
pub mod value_objects;

pub use entities::{DataSource, Identity, TimedRecord};
pub use value_objects::{CalendarDate, DatasetKey, UserId};
