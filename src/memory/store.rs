//! Memory store: operation validation, payload (de)serialization, and the
//! envelope boundary that external callers consume.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

use super::envelope::Envelope;
use super::sqlite::{dedup_tags, Database};

/// A store operation with exactly the fields it needs, validated at
/// construction. Deserializes from the external request shape
/// `{"operation": "store", "key": ..., ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Operation {
    Store {
        key: String,
        data: Value,
        #[serde(default)]
        tags: Vec<String>,
    },
    Retrieve {
        key: String,
    },
    List {
        #[serde(default)]
        tag_filter: Vec<String>,
    },
    Delete {
        key: String,
    },
}

/// A stored entry as returned by `retrieve` and `list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub key: String,
    pub data: Value,
    pub created_at: String,
    pub updated_at: String,
    pub tags: Vec<String>,
}

/// Acknowledgement for a successful `store`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreReceipt {
    pub key: String,
    pub tags: Vec<String>,
    pub timestamp: String,
}

/// Outcome of a `delete`. `deleted == false` means the key was absent,
/// which is not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub key: String,
}

/// Tagged persistent key-value store over one storage directory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    /// Open (or create) the store under `storage_dir`.
    pub fn open(storage_dir: &Path) -> Result<Self, Error> {
        let db = Database::open(storage_dir)?;
        Ok(Self { db })
    }

    /// Store `data` under `key`, replacing any previous data and tag set.
    pub fn store(&self, key: &str, data: &Value, tags: &[String]) -> Result<StoreReceipt, Error> {
        validate_key(key, "store")?;

        let serialized = serde_json::to_string(data)?;
        let tags = dedup_tags(tags);
        let timestamp = now();
        self.db.put(key, &serialized, &tags, &timestamp)?;

        tracing::debug!("Stored {} ({} tags)", key, tags.len());
        Ok(StoreReceipt {
            key: key.to_string(),
            tags,
            timestamp,
        })
    }

    /// Fetch the entry for `key`. A miss is `Ok(None)`, never an error.
    pub fn retrieve(&self, key: &str) -> Result<Option<Entry>, Error> {
        validate_key(key, "retrieve")?;

        let Some(row) = self.db.get(key)? else {
            return Ok(None);
        };
        let data: Value = serde_json::from_str(&row.data)?;
        Ok(Some(Entry {
            key: row.key,
            data,
            created_at: row.created_at,
            updated_at: row.updated_at,
            tags: row.tags,
        }))
    }

    /// All entries whose tag set contains every tag in `tag_filter`.
    /// An empty filter returns everything. Ordered by key.
    pub fn list(&self, tag_filter: &[String]) -> Result<Vec<Entry>, Error> {
        let rows = self.db.list(tag_filter)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let data: Value = serde_json::from_str(&row.data)?;
            entries.push(Entry {
                key: row.key,
                data,
                created_at: row.created_at,
                updated_at: row.updated_at,
                tags: row.tags,
            });
        }
        Ok(entries)
    }

    /// Delete the entry for `key` and all its tag associations. Deleting an
    /// absent key reports `deleted: false`.
    pub fn delete(&self, key: &str) -> Result<DeleteOutcome, Error> {
        validate_key(key, "delete")?;

        let deleted = self.db.delete(key)?;
        if deleted {
            tracing::debug!("Deleted {}", key);
        }
        Ok(DeleteOutcome {
            deleted,
            key: key.to_string(),
        })
    }

    /// Execute one operation and wrap the outcome in an [`Envelope`].
    /// Never panics and never returns an error past this boundary.
    pub fn call(&self, op: Operation) -> Envelope {
        let result = match op {
            Operation::Store { key, data, tags } => self
                .store(&key, &data, &tags)
                .and_then(|receipt| serde_json::to_value(receipt).map_err(Error::from)),
            Operation::Retrieve { key } => self.retrieve(&key).and_then(|entry| match entry {
                Some(entry) => serde_json::to_value(entry).map_err(Error::from),
                None => Ok(Value::Null),
            }),
            Operation::List { tag_filter } => self
                .list(&tag_filter)
                .and_then(|entries| serde_json::to_value(entries).map_err(Error::from)),
            Operation::Delete { key } => self
                .delete(&key)
                .and_then(|outcome| serde_json::to_value(outcome).map_err(Error::from)),
        };

        match result {
            Ok(data) => Envelope::ok(data),
            Err(e) => Envelope::fail(e.to_string()),
        }
    }

    /// Parse a raw JSON request (`{"operation": ..., ...}`) and execute it.
    /// A malformed request fails fast with an invalid-argument envelope
    /// before touching storage.
    pub fn dispatch(&self, request: &Value) -> Envelope {
        let op: Operation = match serde_json::from_value(request.clone()) {
            Ok(op) => op,
            Err(e) => {
                return Envelope::fail(
                    Error::InvalidArgument(format!("bad request: {}", e)).to_string(),
                )
            }
        };
        self.call(op)
    }
}

fn validate_key(key: &str, operation: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{}: key must be non-empty",
            operation
        )));
    }
    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
