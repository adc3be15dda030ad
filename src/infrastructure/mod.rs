pub mod bundled;
pub mod clock;
pub mod database;
pub mod identity;
pub mod remote;
pub mod storage;

pub use bundled::BundledCatalog;
pub use clock::{ManualClock, SystemClock};
pub use database::ConnectionPool;
pub use identity::ChannelIdentityProvider;
pub use remote::InMemoryDocumentStore;
pub use storage::SqliteKeyValueStore;
