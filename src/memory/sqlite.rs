//! SQLite-backed durable storage for entries and their tag associations.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::error::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    key        TEXT PRIMARY KEY,
    data       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tags (
    key TEXT NOT NULL REFERENCES entries(key) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (key, tag)
);
"#;

/// Raw entry row as stored: `data` is serialized JSON text, timestamps are
/// RFC 3339 strings. Tags come back sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRow {
    pub key: String,
    pub data: String,
    pub created_at: String,
    pub updated_at: String,
    pub tags: Vec<String>,
}

/// Handle on one storage directory. One handle per directory is the unit of
/// concurrency; connections are opened per operation and released on return.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the store under `storage_dir`, initializing the
    /// schema.
    pub fn open(storage_dir: &Path) -> Result<Self, Error> {
        std::fs::create_dir_all(storage_dir)?;
        let db = Self {
            db_path: storage_dir.join("memory.db"),
        };
        db.connect()?;
        Ok(db)
    }

    fn connect(&self) -> Result<Connection, Error> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| Error::Storage(format!("sqlite open: {}", e)))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| Error::Storage(format!("sqlite busy timeout: {}", e)))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
            .map_err(|e| Error::Storage(format!("sqlite wal: {}", e)))?;
        // Per-connection in SQLite; required for the tag cascade.
        conn.execute("PRAGMA foreign_keys=ON;", [])
            .map_err(|e| Error::Storage(format!("sqlite foreign keys: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::Storage(format!("sqlite init: {}", e)))?;
        Ok(conn)
    }

    /// Insert or replace the entry for `key` and replace its tag set, in one
    /// transaction. `created_at` is set only on first insert; `updated_at`
    /// always becomes `timestamp`.
    pub fn put(
        &self,
        key: &str,
        data: &str,
        tags: &[String],
        timestamp: &str,
    ) -> Result<(), Error> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("sqlite begin: {}", e)))?;
        tx.execute(
            "INSERT INTO entries (key, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 data = excluded.data,
                 updated_at = excluded.updated_at",
            params![key, data, timestamp, timestamp],
        )
        .map_err(|e| Error::Storage(format!("sqlite upsert entry: {}", e)))?;
        tx.execute("DELETE FROM tags WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(format!("sqlite clear tags: {}", e)))?;
        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO tags (key, tag) VALUES (?1, ?2)",
                params![key, tag],
            )
            .map_err(|e| Error::Storage(format!("sqlite insert tag: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("sqlite commit: {}", e)))?;
        Ok(())
    }

    /// Fetch the entry for `key` with its full tag set, or `None`.
    pub fn get(&self, key: &str) -> Result<Option<EntryRow>, Error> {
        let conn = self.connect()?;
        fetch_entry(&conn, key)
    }

    /// All entries whose tag set is a superset of `tag_filter` (AND
    /// semantics). An empty filter returns every entry. The filter is
    /// de-duplicated before counting, so a repeated tag does not change the
    /// result. Output is ordered by key.
    pub fn list(&self, tag_filter: &[String]) -> Result<Vec<EntryRow>, Error> {
        let conn = self.connect()?;

        let keys: Vec<String> = if tag_filter.is_empty() {
            let mut stmt = conn
                .prepare("SELECT key FROM entries ORDER BY key")
                .map_err(|e| Error::Storage(format!("sqlite prepare list: {}", e)))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| Error::Storage(format!("sqlite query list: {}", e)))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Storage(format!("sqlite read list: {}", e)))?
        } else {
            let filter = dedup_tags(tag_filter);
            let placeholders = vec!["?"; filter.len()].join(", ");
            let sql = format!(
                "SELECT key FROM tags WHERE tag IN ({})
                 GROUP BY key HAVING COUNT(DISTINCT tag) = ?
                 ORDER BY key",
                placeholders
            );
            let want = filter.len() as i64;
            let mut query_params: Vec<&dyn ToSql> =
                filter.iter().map(|t| t as &dyn ToSql).collect();
            query_params.push(&want);

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::Storage(format!("sqlite prepare tag filter: {}", e)))?;
            let rows = stmt
                .query_map(&query_params[..], |row| row.get::<_, String>(0))
                .map_err(|e| Error::Storage(format!("sqlite query tag filter: {}", e)))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Storage(format!("sqlite read tag filter: {}", e)))?
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(row) = fetch_entry(&conn, key)? {
                entries.push(row);
            }
        }
        Ok(entries)
    }

    /// Delete the entry for `key`; its tag associations go with it via the
    /// foreign-key cascade. Returns whether an entry existed.
    pub fn delete(&self, key: &str) -> Result<bool, Error> {
        let conn = self.connect()?;
        let changed = conn
            .execute("DELETE FROM entries WHERE key = ?1", params![key])
            .map_err(|e| Error::Storage(format!("sqlite delete entry: {}", e)))?;
        Ok(changed > 0)
    }
}

/// De-duplicate tags preserving first-occurrence order.
pub fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

fn fetch_entry(conn: &Connection, key: &str) -> Result<Option<EntryRow>, Error> {
    let row = conn
        .query_row(
            "SELECT data, created_at, updated_at FROM entries WHERE key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| Error::Storage(format!("sqlite read entry: {}", e)))?;

    let Some((data, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT tag FROM tags WHERE key = ?1 ORDER BY tag")
        .map_err(|e| Error::Storage(format!("sqlite prepare tags: {}", e)))?;
    let tags = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Storage(format!("sqlite query tags: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Storage(format!("sqlite read tags: {}", e)))?;

    Ok(Some(EntryRow {
        key: key.to_string(),
        data,
        created_at,
        updated_at,
        tags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> Database {
        Database::open(dir.path()).unwrap()
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("k1", r#"{"a":1}"#, &tags(&["x", "y"]), "2024-01-01T00:00:00Z")
            .unwrap();

        let row = db.get("k1").unwrap().unwrap();
        assert_eq!(row.key, "k1");
        assert_eq!(row.data, r#"{"a":1}"#);
        assert_eq!(row.created_at, "2024-01-01T00:00:00Z");
        assert_eq!(row.updated_at, "2024-01-01T00:00:00Z");
        assert_eq!(row.tags, tags(&["x", "y"]));

        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("k", "1", &[], "2024-01-01T00:00:00Z").unwrap();
        db.put("k", "2", &[], "2024-06-01T00:00:00Z").unwrap();

        let row = db.get("k").unwrap().unwrap();
        assert_eq!(row.data, "2");
        assert_eq!(row.created_at, "2024-01-01T00:00:00Z");
        assert_eq!(row.updated_at, "2024-06-01T00:00:00Z");
    }

    #[test]
    fn test_upsert_replaces_tag_set() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("k", "1", &tags(&["old", "both"]), "2024-01-01T00:00:00Z")
            .unwrap();
        db.put("k", "1", &tags(&["both", "new"]), "2024-01-02T00:00:00Z")
            .unwrap();

        let row = db.get("k").unwrap().unwrap();
        assert_eq!(row.tags, tags(&["both", "new"]));

        // The old tag must not match anything anymore.
        assert!(db.list(&tags(&["old"])).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_tags_collapse() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("k", "1", &tags(&["a", "a", "b"]), "2024-01-01T00:00:00Z")
            .unwrap();
        let row = db.get("k").unwrap().unwrap();
        assert_eq!(row.tags, tags(&["a", "b"]));
    }

    #[test]
    fn test_list_tag_intersection() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("a", "1", &tags(&["ci", "release"]), "2024-01-01T00:00:00Z")
            .unwrap();
        db.put("b", "2", &tags(&["ci"]), "2024-01-01T00:00:00Z")
            .unwrap();
        db.put("c", "3", &[], "2024-01-01T00:00:00Z").unwrap();

        // Empty filter returns everything, ordered by key.
        let all = db.list(&[]).unwrap();
        let keys: Vec<&str> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        // Single tag.
        let ci = db.list(&tags(&["ci"])).unwrap();
        let keys: Vec<&str> = ci.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);

        // AND semantics: only entries carrying every filter tag qualify.
        let both = db.list(&tags(&["ci", "release"])).unwrap();
        let keys: Vec<&str> = both.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a"]);

        // No match.
        assert!(db.list(&tags(&["nope"])).unwrap().is_empty());
    }

    #[test]
    fn test_list_filter_duplicates_deduped() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("a", "1", &tags(&["ci"]), "2024-01-01T00:00:00Z")
            .unwrap();

        let once = db.list(&tags(&["ci"])).unwrap();
        let twice = db.list(&tags(&["ci", "ci"])).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 1);
    }

    #[test]
    fn test_delete_cascades_tags() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        db.put("k", "1", &tags(&["ci"]), "2024-01-01T00:00:00Z")
            .unwrap();
        assert!(db.delete("k").unwrap());

        assert!(db.get("k").unwrap().is_none());
        // Tag associations must be gone too.
        assert!(db.list(&tags(&["ci"])).unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);

        assert!(!db.delete("absent").unwrap());
        db.put("k", "1", &[], "2024-01-01T00:00:00Z").unwrap();
        assert!(db.delete("k").unwrap());
        assert!(!db.delete("k").unwrap());
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        {
            let db = open_db(&dir);
            db.put("k", "1", &tags(&["t"]), "2024-01-01T00:00:00Z")
                .unwrap();
        }
        let db = open_db(&dir);
        let row = db.get("k").unwrap().unwrap();
        assert_eq!(row.data, "1");
        assert_eq!(row.tags, tags(&["t"]));
    }
}
