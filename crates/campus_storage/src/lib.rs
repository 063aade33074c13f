#![forbid(unsafe_code)]

pub mod memory;
pub mod repo;

pub use memory::InMemoryCampusStore;
pub use repo::StorageError;
