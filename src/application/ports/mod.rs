pub mod bundled_datasets;
pub mod clock;
pub mod document_store;
pub mod identity_provider;
pub mod key_value_store;

pub use bundled_datasets::BundledDatasets;
pub use clock::Clock;
pub use document_store::{
    DocumentData, DocumentListener, FieldUpdate, RemoteDocument, RemoteDocumentStore,
};
pub use identity_provider::IdentityProvider;
pub use key_value_store::KeyValueStore;
