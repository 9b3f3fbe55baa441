pub mod errors;
pub mod gateway;
pub mod policy;

pub use errors::{CacheError, StoreError, SyncError};
pub use gateway::{CacheGateway, PageRequest, RecordFilter, StoreGateway};
pub use policy::{CacheTtl, RetryPolicy};
