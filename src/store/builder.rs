use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{CacheState, PropertyStore, Shared};
use crate::backend::PropertyBackend;
use crate::error::{Error, Result};
use crate::policy::{ReloadPolicy, StoreOptions, UpdatePolicy};
use crate::scheduler::{PeriodicTask, Scheduler, TaskHandle};

/// Builder for [`PropertyStore`].
///
/// Defaults to [`StoreOptions::default`] and no scheduler. A scheduler is
/// only required for [`ReloadPolicy::Interval`].
pub struct StoreBuilder {
    backend: Arc<dyn PropertyBackend>,
    options: StoreOptions,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("backend", &self.backend.kind())
            .field("options", &self.options)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl StoreBuilder {
    /// Starts a builder over an already shared backend.
    pub fn new(backend: Arc<dyn PropertyBackend>) -> Self {
        Self {
            backend,
            options: StoreOptions::default(),
            scheduler: None,
        }
    }

    #[must_use]
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn reload_policy(mut self, policy: ReloadPolicy) -> Self {
        self.options.reload_policy = policy;
        self
    }

    #[must_use]
    pub fn update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.options.update_policy = policy;
        self
    }

    #[must_use]
    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.options.refresh_period = period;
        self
    }

    /// Scheduler used to drive interval reloads.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validates the options, performs the initial load and, for interval
    /// reloads, schedules the refresh task.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] for invalid options, a missing scheduler,
    ///   or an initial load that failed (the failure is kept as the source)
    /// - [`Error::InvalidSourceFormat`] if the source has the wrong shape
    pub fn build(self) -> Result<PropertyStore> {
        let Self {
            backend,
            options,
            scheduler,
        } = self;

        options.validate()?;
        let scheduler = match (options.reload_policy, scheduler) {
            (ReloadPolicy::Interval, None) => {
                return Err(Error::configuration(
                    "interval reloads require a scheduler",
                ));
            },
            (ReloadPolicy::Interval, Some(s)) => Some(s),
            _ => None,
        };
        warn_on_weak_combinations(backend.as_ref(), &options);

        let shared = Arc::new(Shared {
            backend,
            options,
            state: RwLock::new(CacheState::default()),
        });

        shared.reload().map_err(|e| match e {
            Error::InvalidSourceFormat { .. } => e,
            other => Error::configuration_caused_by(
                format!("initial load from '{}' failed", shared.backend.location()),
                other,
            ),
        })?;

        let refresh = scheduler.map(|scheduler| {
            let period = options.refresh_period;
            let own_handle = Arc::new(OnceLock::new());
            let handle = scheduler.schedule(
                refresh_task(Arc::downgrade(&shared), own_handle.clone()),
                period,
                period,
            );
            let _ = own_handle.set(handle.clone());
            handle
        });

        info!(
            backend = shared.backend.kind(),
            source = %shared.backend.location(),
            reload = %options.reload_policy,
            update = %options.update_policy,
            entries = shared.state.read().entries.len(),
            "Property store ready"
        );

        Ok(PropertyStore {
            shared,
            refresh: Mutex::new(refresh),
        })
    }
}

/// The scheduled refresh only holds a weak reference, so an abandoned store
/// is not kept alive by its own task. Once the store is gone the task
/// cancels itself.
fn refresh_task(shared: Weak<Shared>, own_handle: Arc<OnceLock<TaskHandle>>) -> PeriodicTask {
    Arc::new(move || match shared.upgrade() {
        Some(shared) => shared.reload(),
        None => {
            if let Some(handle) = own_handle.get()
                && handle.cancel()
            {
                debug!("Store dropped without close, cancelled its refresh");
            }
            Ok(())
        },
    })
}

fn warn_on_weak_combinations(backend: &dyn PropertyBackend, options: &StoreOptions) {
    if options.checks_staleness() && !backend.has_cheap_stamp() {
        warn!(
            backend = backend.kind(),
            source = %backend.location(),
            "Staleness checks on this backend cost a full load per read"
        );
    }
    if options.update_policy == UpdatePolicy::SourceManaged
        && options.reload_policy == ReloadPolicy::Never
    {
        warn!(
            source = %backend.location(),
            "Source-managed store never reloads, external changes will not be seen"
        );
    }
}
