//! Reloadable property store.
//!
//! [`PropertyStore`] caches the key/value set of one backend and keeps it
//! consistent with the source under a [`ReloadPolicy`](crate::ReloadPolicy)
//! and an [`UpdatePolicy`](crate::UpdatePolicy).
//!
//! # Locking
//!
//! The cache and the freshness stamp live behind one `parking_lot::RwLock`.
//! Every mutation (reload, stale reload, local write) holds the lock's
//! upgradable guard while it talks to the backend, so mutations are totally
//! ordered and never interleave; readers keep seeing the previous snapshot
//! until the mutation upgrades to the write guard and swaps the new state in.
//!
//! # Example
//!
//! ```ignore
//! use propstore::{PropertyStore, ReloadPolicy, UpdatePolicy};
//! use propstore::backend::FileBackend;
//!
//! let store = PropertyStore::builder(FileBackend::open("app.properties")?)
//!     .reload_policy(ReloadPolicy::OnAccessIfStale)
//!     .update_policy(UpdatePolicy::SourceManaged)
//!     .build()?;
//!
//! if let Some(url) = store.get_property("db.url")? {
//!     println!("db.url = {url}");
//! }
//! store.close();
//! ```

mod builder;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, info};

use crate::backend::{Change, Properties, PropertyBackend, SourceStamp, WriteMode};
use crate::error::{Error, Result};
use crate::policy::StoreOptions;
use crate::scheduler::TaskHandle;

pub use builder::StoreBuilder;

#[derive(Debug, Default)]
struct CacheState {
    entries: Properties,
    /// Stamp of the source when `entries` was loaded. Only tracked when
    /// reads check staleness.
    stamp: Option<SourceStamp>,
}

/// State shared between the store and its scheduled refresh task.
struct Shared {
    backend: Arc<dyn PropertyBackend>,
    options: StoreOptions,
    state: RwLock<CacheState>,
}

impl Shared {
    /// Full reload from the source, serialized with every other mutation.
    fn reload(&self) -> Result<()> {
        let guard = self.state.upgradable_read();
        let stamp = if self.options.checks_staleness() {
            Some(self.backend.stamp()?)
        } else {
            None
        };
        let entries = self.backend.load_all()?;
        let count = entries.len();

        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        state.entries = entries;
        state.stamp = stamp;
        drop(state);

        debug!(source = %self.backend.location(), entries = count, "Reloaded properties");
        Ok(())
    }

    /// Reloads before a read if the source moved since the last load.
    ///
    /// Readers racing on the same stale source reload once: whoever takes
    /// the upgradable guard first reloads, the rest find the stamp current.
    fn refresh_if_stale(&self) -> Result<()> {
        if !self.options.checks_staleness() {
            return Ok(());
        }

        let current = self.backend.stamp()?;
        if self.state.read().stamp == Some(current) {
            return Ok(());
        }

        let guard = self.state.upgradable_read();
        if guard.stamp == Some(current) {
            return Ok(());
        }
        let entries = self.backend.load_all()?;
        let count = entries.len();

        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        state.entries = entries;
        state.stamp = Some(current);
        drop(state);

        info!(source = %self.backend.location(), entries = count, "Source changed, reloaded properties");
        Ok(())
    }

    fn write(&self, entries: Properties, mode: WriteMode) -> Result<()> {
        let guard = self.state.upgradable_read();

        self.backend
            .apply_change(Change {
                entries: &entries,
                mode,
                cached: &guard.entries,
            })
            .map_err(|e| match e {
                Error::Persistence { .. } | Error::UnsupportedOperation { .. } => e,
                other => Error::persistence(self.backend.location(), other),
            })?;

        let written = entries.len();
        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        match mode {
            WriteMode::Replace => state.entries = entries,
            WriteMode::Upsert => state.entries.extend(entries),
        }
        drop(state);

        debug!(source = %self.backend.location(), ?mode, written, "Persisted properties");
        Ok(())
    }
}

/// Thread-safe, reloadable cache over one property backend.
///
/// All methods take `&self`; share the store across threads with `Arc`.
/// A store scheduled for interval reloads keeps its refresh task until
/// [`close`](Self::close) is called.
pub struct PropertyStore {
    shared: Arc<Shared>,
    refresh: Mutex<Option<TaskHandle>>,
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("backend", &self.shared.backend.kind())
            .field("location", &self.shared.backend.location())
            .field("options", &self.shared.options)
            .field("scheduled", &self.refresh.lock().is_some())
            .finish()
    }
}

impl PropertyStore {
    /// Starts building a store over `backend`.
    pub fn builder<B: PropertyBackend>(backend: B) -> StoreBuilder {
        StoreBuilder::new(Arc::new(backend))
    }

    /// Returns the value for `key`, or `None` if the source does not define it.
    ///
    /// Under `OnAccessIfStale` + `SourceManaged`, the source's freshness
    /// stamp is checked first and the cache reloaded if it moved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the freshness check or the
    /// reload fails. A missing key is never an error.
    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        self.shared.refresh_if_stale()?;
        Ok(self.shared.state.read().entries.get(key).cloned())
    }

    /// Returns a copy of every cached property.
    ///
    /// The snapshot is owned by the caller and never changes afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the freshness check or the
    /// reload fails.
    pub fn get_properties(&self) -> Result<Properties> {
        self.shared.refresh_if_stale()?;
        Ok(self.shared.state.read().entries.clone())
    }

    /// Returns true if `key` is defined.
    ///
    /// # Errors
    ///
    /// Same as [`get_property`](Self::get_property).
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.shared.refresh_if_stale()?;
        Ok(self.shared.state.read().entries.contains_key(key))
    }

    /// Returns the number of cached properties.
    ///
    /// # Errors
    ///
    /// Same as [`get_properties`](Self::get_properties).
    pub fn len(&self) -> Result<usize> {
        self.shared.refresh_if_stale()?;
        Ok(self.shared.state.read().entries.len())
    }

    /// Returns true if no properties are defined.
    ///
    /// # Errors
    ///
    /// Same as [`get_properties`](Self::get_properties).
    pub fn is_empty(&self) -> Result<bool> {
        self.shared.refresh_if_stale()?;
        Ok(self.shared.state.read().entries.is_empty())
    }

    /// Inserts or overwrites one property.
    ///
    /// A no-op under `SourceManaged`.
    ///
    /// # Errors
    ///
    /// See [`set_properties`](Self::set_properties).
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let mut entries = Properties::with_capacity(1);
        entries.insert(key.into(), value.into());
        self.set_properties(entries, false)
    }

    /// Writes `entries` to the source and then to the cache.
    ///
    /// With `replace`, the source and cache end up holding exactly `entries`;
    /// otherwise each given key is inserted or overwritten and the rest are
    /// left alone. A no-op under `SourceManaged`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the backend write fails, or
    /// [`Error::UnsupportedOperation`] for read-only backends. In both cases
    /// the cache is unchanged.
    pub fn set_properties(&self, entries: Properties, replace: bool) -> Result<()> {
        if self.shared.options.ignores_local_writes() {
            debug!(
                source = %self.shared.backend.location(),
                keys = entries.len(),
                "Ignoring local write to source-managed store"
            );
            return Ok(());
        }
        self.shared.write(entries, WriteMode::from_replace(replace))
    }

    /// Reloads the full key/value set from the source now.
    ///
    /// # Errors
    ///
    /// Returns the backend's load error; the cache keeps its previous contents.
    pub fn reload(&self) -> Result<()> {
        self.shared.reload()
    }

    /// Cancels the scheduled refresh task, if any.
    ///
    /// Idempotent. A refresh already running is allowed to finish.
    pub fn close(&self) {
        if let Some(handle) = self.refresh.lock().take() {
            handle.cancel();
            info!(
                source = %self.shared.backend.location(),
                runs = handle.runs(),
                failures = handle.failures(),
                "Cancelled scheduled refresh"
            );
        }
    }

    /// Handle of the scheduled refresh task, until the store is closed.
    pub fn refresh_handle(&self) -> Option<TaskHandle> {
        self.refresh.lock().clone()
    }

    /// Policies this store was built with.
    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    /// Location of the backing source.
    pub fn location(&self) -> String {
        self.shared.backend.location()
    }
}
