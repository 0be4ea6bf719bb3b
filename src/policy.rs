//! Reload and update policies.
//!
//! A store is configured by two independent choices:
//!
//! - [`ReloadPolicy`] - whether and when the cache is refreshed from the source
//! - [`UpdatePolicy`] - whether callers may write, or all change comes from the source
//!
//! Both enums deserialize from the policy names used in configuration files,
//! including the legacy spellings (`none`, `store_changed`, `internal`, `external`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default period between scheduled refreshes.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(60);

/// Governs whether and when the cache is refreshed from the backing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Load once at construction and never again.
    #[serde(alias = "none")]
    Never,
    /// Reload on a fixed period through the injected scheduler.
    Interval,
    /// Before each read, compare the source's freshness stamp and reload if it moved.
    ///
    /// Only takes effect together with [`UpdatePolicy::SourceManaged`].
    #[serde(alias = "store_changed")]
    OnAccessIfStale,
}

impl fmt::Display for ReloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Never => "never",
            Self::Interval => "interval",
            Self::OnAccessIfStale => "on_access_if_stale",
        };
        f.write_str(name)
    }
}

/// Governs whether writes are accepted locally or must originate at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Writes go through the store: persisted to the source, then committed to the cache.
    #[serde(alias = "internal")]
    LocalOnly,
    /// The source is edited externally; local writes are accepted as no-ops.
    #[serde(alias = "external")]
    SourceManaged,
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalOnly => "local_only",
            Self::SourceManaged => "source_managed",
        };
        f.write_str(name)
    }
}

/// Policy combination for a single store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub reload_policy: ReloadPolicy,
    pub update_policy: UpdatePolicy,
    /// Period between scheduled refreshes. Only read for [`ReloadPolicy::Interval`].
    pub refresh_period: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reload_policy: ReloadPolicy::Never,
            update_policy: UpdatePolicy::LocalOnly,
            refresh_period: DEFAULT_REFRESH_PERIOD,
        }
    }
}

impl StoreOptions {
    /// Options for a store that reloads every `period`.
    #[must_use]
    pub fn interval(period: Duration, update_policy: UpdatePolicy) -> Self {
        Self {
            reload_policy: ReloadPolicy::Interval,
            update_policy,
            refresh_period: period,
        }
    }

    /// Returns true when reads must probe the source before serving.
    pub fn checks_staleness(&self) -> bool {
        self.reload_policy == ReloadPolicy::OnAccessIfStale
            && self.update_policy == UpdatePolicy::SourceManaged
    }

    /// Returns true when local writes are silently ignored.
    pub fn ignores_local_writes(&self) -> bool {
        self.update_policy == UpdatePolicy::SourceManaged
    }

    /// Validate the policy combination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the reload policy is `Interval`
    /// and the refresh period is zero.
    pub fn validate(&self) -> Result<()> {
        if self.reload_policy == ReloadPolicy::Interval && self.refresh_period.is_zero() {
            return Err(Error::configuration(
                "refresh period must be greater than zero for interval reloads",
            ));
        }
        Ok(())
    }
}
