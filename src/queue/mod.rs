//! Durable offline queue for undelivered backend requests.

pub mod offline;
pub mod store;

pub use offline::{DrainReport, OfflineQueue, QUEUE_CAPACITY, QueuedRequest};
pub use store::{JsonFileStore, MemoryStore, QueueStore};
