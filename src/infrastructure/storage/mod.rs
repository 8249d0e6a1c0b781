pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryDurableStore;
pub use sqlite_store::SqliteDurableStore;
