//! TOML configuration for a property store.
//!
//! A config file names the policies and one source:
//!
//! ```toml
//! [store]
//! reload = "interval"
//! update = "internal"
//! refresh_period_secs = 30
//!
//! [source]
//! kind = "file"
//! path = "app.properties"
//! ```
//!
//! SQLite sources use `kind = "sqlite"` with `database`, `table`,
//! `key_column` and `value_column`. Relative paths are resolved against the
//! directory of the config file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FileBackend, PropertyBackend, SqlBackend, SqliteFile, TableSpec};
use crate::error::{Error, Result};
use crate::policy::{DEFAULT_REFRESH_PERIOD, ReloadPolicy, StoreOptions, UpdatePolicy};
use crate::scheduler::Scheduler;
use crate::store::{PropertyStore, StoreBuilder};

/// Root of a store configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default)]
    pub store: StoreSection,
    pub source: SourceConfig,
    /// Directory relative source paths are resolved against.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// `[store]` table. Both policies must be set explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    pub reload: Option<ReloadPolicy>,
    pub update: Option<UpdatePolicy>,
    pub refresh_period_secs: Option<u64>,
}

/// `[source]` table, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SourceConfig {
    File {
        path: PathBuf,
    },
    Sqlite {
        database: PathBuf,
        table: String,
        key_column: String,
        value_column: String,
        #[serde(default)]
        busy_timeout_ms: Option<u64>,
    },
}

impl StoreConfig {
    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the file cannot be read or is not
    /// a valid store configuration.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read config file {}: {e}", path.display()))
        })?;

        let mut config = Self::parse(&content).map_err(|e| {
            Error::configuration_caused_by(format!("invalid config file {}", path.display()), e)
        })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse configuration from TOML text. Relative paths stay relative to
    /// the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on invalid TOML, unknown policy
    /// names or unknown source kinds.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::configuration(e.message().to_string()))
    }

    /// Resolve the policy section into store options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a policy is unset or the refresh
    /// period is invalid for the chosen reload policy.
    pub fn options(&self) -> Result<StoreOptions> {
        let mut missing = Vec::new();
        if self.store.reload.is_none() {
            missing.push("store.reload");
        }
        if self.store.update.is_none() {
            missing.push("store.update");
        }

        let (Some(reload_policy), Some(update_policy)) = (self.store.reload, self.store.update)
        else {
            return Err(Error::configuration(format!(
                "unset policy: {} must be set",
                missing.join(", ")
            )));
        };

        let options = StoreOptions {
            reload_policy,
            update_policy,
            refresh_period: self
                .store
                .refresh_period_secs
                .map_or(DEFAULT_REFRESH_PERIOD, Duration::from_secs),
        };
        options.validate()?;
        Ok(options)
    }

    /// Construct the configured backend.
    ///
    /// # Errors
    ///
    /// Returns the backend's construction error, typically
    /// [`Error::Configuration`] for a missing file or unreachable database.
    pub fn backend(&self) -> Result<Arc<dyn PropertyBackend>> {
        match &self.source {
            SourceConfig::File { path } => Ok(Arc::new(FileBackend::open(self.resolve(path))?)),
            SourceConfig::Sqlite {
                database,
                table,
                key_column,
                value_column,
                busy_timeout_ms,
            } => {
                let mut provider = SqliteFile::new(self.resolve(database));
                if let Some(ms) = busy_timeout_ms {
                    provider = provider.with_busy_timeout(Duration::from_millis(*ms));
                }
                let spec = TableSpec::new(table, key_column, value_column);
                Ok(Arc::new(SqlBackend::new(Arc::new(provider), spec)?))
            },
        }
    }

    /// Build the configured store.
    ///
    /// `scheduler` is required when the reload policy is `interval`.
    ///
    /// # Errors
    ///
    /// Returns any error from [`options`](Self::options),
    /// [`backend`](Self::backend) or [`StoreBuilder::build`].
    pub fn open(&self, scheduler: Option<Arc<dyn Scheduler>>) -> Result<PropertyStore> {
        let options = self.options()?;
        let mut builder = StoreBuilder::new(self.backend()?).options(options);
        if let Some(scheduler) = scheduler {
            builder = builder.scheduler(scheduler);
        }
        builder.build()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
