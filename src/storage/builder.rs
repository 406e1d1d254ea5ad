//! # Database Builder
//!
//! This module provides the `DatabaseBuilder` API for configuring and opening
//! database files.
//!
//! ## Builder Pattern
//!
//! `DatabaseBuilder` uses the builder pattern to provide a fluent API for
//! database configuration. Settings can be chained together before calling
//! `open()` to open or create the file.
//!
//! ## Configuration Options
//!
//! | Option          | Default                  | Description                                |
//! |-----------------|--------------------------|--------------------------------------------|
//! | cache           | private 4 MiB cache      | Chunk cache, may be shared between files   |
//! | version         | 1                        | Version recorded in a newly created file   |
//! | read_only       | false                    | Open without write access                  |
//! | setaside_chunks | `PDOM_DENSE_RECPTR_...`  | Filler chunks reserved by `clear()`        |
//!
//! ## Usage Examples
//!
//! ```ignore
//! let cache = Arc::new(ChunkCache::new(64 * 1024 * 1024));
//!
//! let index = Database::builder()
//!     .path("./index.pdom")
//!     .cache(Arc::clone(&cache))
//!     .version(3)
//!     .open()?;
//!
//! let other = Database::builder()
//!     .path("./other.pdom")
//!     .cache(cache)
//!     .read_only(true)
//!     .open()?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Result;

use super::{ChunkCache, Database};
use crate::config::{setaside_chunks_from_env, DEFAULT_DB_VERSION};

/// Builder for configuring and opening a database file.
#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    cache: Option<Arc<ChunkCache>>,
    version: Option<i32>,
    read_only: Option<bool>,
    setaside_chunks: Option<u32>,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database file. Created on open unless read-only.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Uses `cache` for this database's chunks. Passing the same cache to
    /// several databases bounds their combined memory.
    pub fn cache(mut self, cache: Arc<ChunkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Version recorded when the file is created. Ignored for existing files,
    /// whose stored version is reported by [`Database::version`].
    pub fn version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Number of filler chunks `clear()` reserves after the header. Overrides
    /// the environment variable.
    pub fn setaside_chunks(mut self, count: u32) -> Self {
        self.setaside_chunks = Some(count);
        self
    }

    /// Opens or creates the database with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No path was specified
    /// - The file cannot be opened or its header cannot be read
    pub fn open(self) -> Result<Database> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| eyre::eyre!("database path not specified: call .path() first"))?;
        let cache = self.cache.clone().unwrap_or_default();
        let setaside = self.setaside_chunks.unwrap_or_else(setaside_chunks_from_env);

        Database::open_with(
            path,
            cache,
            self.version.unwrap_or(DEFAULT_DB_VERSION),
            self.read_only.unwrap_or(false),
            setaside,
        )
    }

    pub fn get_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_version(&self) -> Option<i32> {
        self.version
    }

    pub fn get_read_only(&self) -> Option<bool> {
        self.read_only
    }

    pub fn get_setaside_chunks(&self) -> Option<u32> {
        self.setaside_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_SIZE;
    use tempfile::tempdir;

    #[test]
    fn builder_path_sets_value() {
        let builder = DatabaseBuilder::new().path("/tmp/test.pdom");
        assert_eq!(builder.get_path(), Some(Path::new("/tmp/test.pdom")));
    }

    #[test]
    fn builder_version_sets_value() {
        let builder = DatabaseBuilder::new().version(12);
        assert_eq!(builder.get_version(), Some(12));
    }

    #[test]
    fn builder_read_only_sets_value() {
        let builder = DatabaseBuilder::new().read_only(true);
        assert_eq!(builder.get_read_only(), Some(true));
    }

    #[test]
    fn builder_open_without_path_fails() {
        let result = DatabaseBuilder::new().open();

        match result {
            Err(e) => assert!(e.to_string().contains("database path not specified")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn builder_open_creates_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.pdom");

        let db = DatabaseBuilder::new().path(&path).version(5).open().unwrap();

        assert!(path.exists());
        assert_eq!(db.version(), 5);
    }

    #[test]
    fn builder_shares_cache_between_databases() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(ChunkCache::with_capacity(8));

        let a = DatabaseBuilder::new()
            .path(dir.path().join("a.pdom"))
            .cache(Arc::clone(&cache))
            .open()
            .unwrap();
        let b = DatabaseBuilder::new()
            .path(dir.path().join("b.pdom"))
            .cache(Arc::clone(&cache))
            .open()
            .unwrap();

        assert!(Arc::ptr_eq(a.cache(), b.cache()));
    }

    #[test]
    fn setaside_chunks_are_reserved_on_clear() {
        let dir = tempdir().unwrap();
        let db = DatabaseBuilder::new()
            .path(dir.path().join("setaside.pdom"))
            .setaside_chunks(100)
            .open()
            .unwrap();
        db.set_exclusive_lock().unwrap();
        db.clear(2).unwrap();

        assert_eq!(db.chunk_count(), 101);
        let ptr = db.malloc(8).unwrap();
        assert!(ptr.offset() >= 101 * CHUNK_SIZE as u64);
    }
}
