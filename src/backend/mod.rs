//! Backend adapters with a shared load/write contract.
//!
//! A backend knows how to read the complete key/value set from one kind of
//! source and, where the source allows it, how to write a change back.
//! The store owns all caching, locking and policy logic; backends stay thin.
//!
//! - **FileBackend**: a properties-format text file
//! - **DirectoryBackend**: an object bound under a name in a [`NamingContext`]
//! - **SqlBackend**: a key/value table reached through a [`ConnectionProvider`]
//!
//! # Custom Backends
//!
//! Implement the `PropertyBackend` trait to plug in another source:
//!
//! ```ignore
//! use propstore::backend::{Change, PropertyBackend, Properties};
//!
//! struct EtcdBackend { /* ... */ }
//! impl PropertyBackend for EtcdBackend { /* ... */ }
//!
//! let store = PropertyStore::builder(EtcdBackend::connect(url)?).build()?;
//! ```

mod directory;
mod file;
pub mod properties;
mod sql;

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use crate::error::Result;

pub use directory::{BoundObject, DirectoryBackend, InMemoryContext, NamingContext, NamingError};
pub use file::FileBackend;
pub use sql::{ConnectionProvider, SqlBackend, SqliteFile, Statement, TableSpec};

/// Key/value mapping held by the store and exchanged with backends.
pub type Properties = HashMap<String, String>;

/// How a change is reconciled with what the source already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Discard everything currently stored and adopt exactly the given set.
    Replace,
    /// Insert or overwrite each given key, leaving all others untouched.
    Upsert,
}

impl WriteMode {
    /// Map the `replace` flag of `set_properties` onto a mode.
    pub fn from_replace(replace: bool) -> Self {
        if replace { Self::Replace } else { Self::Upsert }
    }
}

/// A write request handed to [`PropertyBackend::apply_change`].
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    /// Entries to write.
    pub entries: &'a Properties,
    pub mode: WriteMode,
    /// The store's cache at call time. Backends may use it to decide how to
    /// address existing rows; it is never mutated by the backend.
    pub cached: &'a Properties,
}

/// Opaque freshness marker used to detect source changes without a full reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStamp {
    /// Filesystem metadata of a file source.
    ///
    /// An external edit that keeps the file length and lands within the same
    /// mtime tick (coarse-granularity filesystems) is not detected.
    Modified { at: SystemTime, len: u64 },
    /// Content digest of the full key/value set.
    Digest(blake3::Hash),
}

impl SourceStamp {
    /// Digest a key/value set independently of map iteration order.
    pub fn digest_of(entries: &Properties) -> Self {
        let ordered: BTreeMap<&str, &str> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut hasher = blake3::Hasher::new();
        for (key, value) in ordered {
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        Self::Digest(hasher.finalize())
    }
}

/// Backend trait for property sources.
///
/// All backends must be thread-safe (`Send + Sync`): the store calls them
/// from caller threads and from the scheduler's refresh task. Calls are
/// synchronous and may block on I/O.
pub trait PropertyBackend: Send + Sync + 'static {
    /// Short backend kind used in logs and errors (`"file"`, `"sql"`, ...).
    fn kind(&self) -> &'static str;

    /// Human-readable location of the source (path, table, binding name).
    fn location(&self) -> String;

    /// Fetches the complete current key/value set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`](crate::Error::SourceUnavailable)
    /// on any I/O, connectivity or malformed-source condition, or
    /// [`Error::InvalidSourceFormat`](crate::Error::InvalidSourceFormat) when
    /// the source exists but has the wrong shape.
    fn load_all(&self) -> Result<Properties>;

    /// Persists a change with exactly the semantics of `change.mode`.
    ///
    /// Must not leave a partially applied change visible on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`](crate::Error::Persistence) if the write
    /// fails, or [`Error::UnsupportedOperation`](crate::Error::UnsupportedOperation)
    /// for read-only sources.
    fn apply_change(&self, change: Change<'_>) -> Result<()>;

    /// Returns the source's current freshness stamp.
    ///
    /// The default implementation digests a full load, which is correct for
    /// any backend but costs as much as a reload.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`load_all`](Self::load_all).
    fn stamp(&self) -> Result<SourceStamp> {
        Ok(SourceStamp::digest_of(&self.load_all()?))
    }

    /// Returns true if [`stamp`](Self::stamp) is much cheaper than a full load.
    fn has_cheap_stamp(&self) -> bool {
        false
    }
}
