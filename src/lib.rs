//! propstore - a thread-safe, reloadable key/value property store.
//!
//! A [`PropertyStore`] caches the properties of one source (a properties
//! file, a directory binding or a SQL table) and keeps the cache consistent
//! with the source according to a [`ReloadPolicy`] and an [`UpdatePolicy`].
//!
//! - [`backend`] - source adapters and the [`PropertyBackend`](backend::PropertyBackend) trait
//! - [`scheduler`] - periodic refresh scheduling
//! - [`config`] - TOML configuration
//! - [`logging`] - tracing setup for the binary

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};
pub use policy::{DEFAULT_REFRESH_PERIOD, ReloadPolicy, StoreOptions, UpdatePolicy};
pub use store::{PropertyStore, StoreBuilder};
