//! Storage implementations for carebridge.
//!
//! Record stores implement `carebridge_core::RecordStore`; file stores
//! implement `carebridge_core::FileStore`.

pub mod files;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use files::{InMemoryFileStore, LocalFileStore, PENDING_FOLDER};
pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
