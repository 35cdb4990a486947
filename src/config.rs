//! Storage directory resolution for memvault.

use std::path::PathBuf;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the memvault home directory (~/.memvault).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".memvault"))
}

/// Get the default storage directory (~/.memvault/memory).
///
/// One store handle per directory is the unit of concurrency; callers that
/// want an isolated store pass their own directory instead.
pub fn default_storage_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("memory"))
}
