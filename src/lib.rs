//! memvault library root.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;

pub use cli::Commands;
pub use error::{Error, Result};
pub use memory::{DeleteOutcome, Entry, Envelope, MemoryStore, Operation, StoreReceipt};
