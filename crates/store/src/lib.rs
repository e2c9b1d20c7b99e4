pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{AggregateId, ResourceId};
pub use error::{Result, StoreError};
pub use memory::InMemoryResourceStore;
pub use postgres::PostgresResourceStore;
pub use store::{ResourceStore, ResourceStoreExt};
