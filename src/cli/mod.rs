//! CLI commands for memvault using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;

use crate::config::default_storage_dir;
use crate::error::Error;
use crate::memory::{Envelope, MemoryStore, Operation};

/// memvault - tagged persistent key-value store.
#[derive(Parser)]
#[command(name = "memvault")]
#[command(version = "0.1.0")]
#[command(about = "Tagged persistent key-value store", long_about = None)]
pub struct Commands {
    /// Storage directory (default: ~/.memvault/memory)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store JSON data under a key
    Store {
        /// Key for the data
        key: String,

        /// JSON data to store, or '-' to read from stdin
        data: String,

        /// Tag for the data (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Retrieve the entry for a key
    Retrieve {
        /// Key to retrieve
        key: String,
    },

    /// List entries, optionally filtered by tags (an entry must carry every given tag)
    List {
        /// Filter tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete the entry for a key
    Delete {
        /// Key to delete
        key: String,
    },

    /// Execute a raw JSON request: {"operation": "store"|"retrieve"|"list"|"delete", ...}
    Call {
        /// JSON request, or '-' to read from stdin
        request: String,
    },
}

impl Commands {
    /// Run the command and print the result envelope as JSON on stdout.
    ///
    /// An envelope with `success: false` still exits 0 -- operation failure
    /// is data for the caller, not a process error.
    pub fn run(&self) -> Result<()> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => default_storage_dir()?,
        };
        let store = MemoryStore::open(&dir)?;

        let envelope = match &self.command {
            Command::Store { key, data, tags } => match read_json_arg(data) {
                Ok(data) => store.call(Operation::Store {
                    key: key.clone(),
                    data,
                    tags: tags.clone(),
                }),
                Err(e) => invalid_argument("data", &e),
            },
            Command::Retrieve { key } => store.call(Operation::Retrieve { key: key.clone() }),
            Command::List { tags } => store.call(Operation::List {
                tag_filter: tags.clone(),
            }),
            Command::Delete { key } => store.call(Operation::Delete { key: key.clone() }),
            Command::Call { request } => match read_json_arg(request) {
                Ok(request) => store.dispatch(&request),
                Err(e) => invalid_argument("request", &e),
            },
        };

        println!("{}", serde_json::to_string_pretty(&envelope)?);
        Ok(())
    }
}

/// Parse a JSON argument, reading from stdin when the argument is `-`.
fn read_json_arg(arg: &str) -> Result<Value> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

fn invalid_argument(field: &str, e: &anyhow::Error) -> Envelope {
    Envelope::fail(Error::InvalidArgument(format!("{}: {}", field, e)).to_string())
}
