//! Tagged persistent key-value store with SQLite persistence.

pub mod envelope;
pub mod sqlite;
pub mod store;

pub use envelope::Envelope;
pub use store::{DeleteOutcome, Entry, MemoryStore, Operation, StoreReceipt};
