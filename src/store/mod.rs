pub mod error;
pub mod memory;
pub mod persistence;
pub mod ports;

pub use error::{StoreError, StoreErrorKind};
pub use memory::InMemoryStore;
pub use persistence::JsonFileStore;
pub use ports::{AllocationStore, CampaignStore, ExportSink};
