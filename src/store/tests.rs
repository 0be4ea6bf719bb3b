use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::policy::{ReloadPolicy, UpdatePolicy};
use crate::scheduler::{PeriodicTask, Scheduler};

fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// =============================================================================
// Test doubles
// =============================================================================

/// In-memory backend that counts loads and can be made to fail.
#[derive(Default)]
struct MemoryBackend {
    data: Mutex<Properties>,
    version: AtomicUsize,
    loads: AtomicUsize,
    stamps: AtomicUsize,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
    load_delay: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        let backend = Self::default();
        *backend.data.lock() = props(pairs);
        Arc::new(backend)
    }

    /// Simulates an edit made outside the store.
    fn external_set(&self, key: &str, value: &str) {
        self.data.lock().insert(key.into(), value.into());
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl PropertyBackend for Arc<MemoryBackend> {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn location(&self) -> String {
        "memory://test".into()
    }

    fn load_all(&self) -> Result<Properties> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::source_unavailable(self.location(), "backend down"));
        }
        Ok(self.data.lock().clone())
    }

    fn apply_change(&self, change: Change<'_>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence(self.location(), "disk full"));
        }
        let mut data = self.data.lock();
        match change.mode {
            WriteMode::Replace => *data = change.entries.clone(),
            WriteMode::Upsert => data.extend(change.entries.clone()),
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stamp(&self) -> Result<SourceStamp> {
        self.stamps.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::source_unavailable(self.location(), "backend down"));
        }
        let version = self.version.load(Ordering::SeqCst) as u64;
        Ok(SourceStamp::Modified {
            at: std::time::UNIX_EPOCH,
            len: version,
        })
    }

    fn has_cheap_stamp(&self) -> bool {
        true
    }
}

/// Scheduler that records the task and lets the test fire ticks by hand.
#[derive(Default)]
struct ManualScheduler {
    scheduled: Mutex<Vec<(PeriodicTask, Duration, Duration, TaskHandle)>>,
}

impl ManualScheduler {
    fn tick(&self) -> Vec<Result<()>> {
        let tasks: Vec<_> = self
            .scheduled
            .lock()
            .iter()
            .filter(|(_, _, _, handle)| !handle.is_cancelled())
            .map(|(task, _, _, handle)| (task.clone(), handle.clone()))
            .collect();
        tasks
            .into_iter()
            .map(|(task, handle)| {
                let result = task();
                handle.record_run(result.is_err());
                result
            })
            .collect()
    }
}

impl Scheduler for Arc<ManualScheduler> {
    fn schedule(&self, task: PeriodicTask, initial_delay: Duration, period: Duration) -> TaskHandle {
        let (handle, _receiver) = TaskHandle::new();
        self.scheduled
            .lock()
            .push((task, initial_delay, period, handle.clone()));
        handle
    }
}

fn interval_store(
    backend: &Arc<MemoryBackend>,
    update: UpdatePolicy,
) -> (PropertyStore, Arc<ManualScheduler>) {
    let scheduler = Arc::new(ManualScheduler::default());
    let store = PropertyStore::builder(backend.clone())
        .options(StoreOptions::interval(Duration::from_secs(1), update))
        .scheduler(Arc::new(scheduler.clone()))
        .build()
        .unwrap();
    (store, scheduler)
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_build_performs_initial_load() {
    let backend = MemoryBackend::with(&[("prop1", "Line1"), ("prop2", "Line2")]);
    let store = PropertyStore::builder(backend.clone()).build().unwrap();

    assert_eq!(backend.loads(), 1);
    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn test_failed_initial_load_is_configuration_error() {
    let backend = MemoryBackend::with(&[]);
    backend.fail_loads.store(true, Ordering::SeqCst);

    let err = PropertyStore::builder(backend).build().unwrap_err();
    match err {
        Error::Configuration { source, .. } => {
            assert!(matches!(source.as_deref(), Some(Error::SourceUnavailable { .. })));
        },
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
fn test_interval_without_scheduler_is_rejected() {
    let backend = MemoryBackend::with(&[]);
    let err = PropertyStore::builder(backend.clone())
        .reload_policy(ReloadPolicy::Interval)
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::Configuration { .. }));
    assert_eq!(backend.loads(), 0);
}

#[test]
fn test_zero_period_is_rejected() {
    let backend = MemoryBackend::with(&[]);
    let err = PropertyStore::builder(backend)
        .reload_policy(ReloadPolicy::Interval)
        .refresh_period(Duration::ZERO)
        .scheduler(Arc::new(Arc::new(ManualScheduler::default())))
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_interval_schedules_with_period_as_initial_delay() {
    let backend = MemoryBackend::with(&[]);
    let (store, scheduler) = interval_store(&backend, UpdatePolicy::LocalOnly);

    let scheduled = scheduler.scheduled.lock();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].1, Duration::from_secs(1));
    assert_eq!(scheduled[0].2, Duration::from_secs(1));
    drop(scheduled);
    assert!(store.refresh_handle().is_some());
}

#[test]
fn test_non_interval_policies_schedule_nothing() {
    let backend = MemoryBackend::with(&[]);
    let scheduler = Arc::new(ManualScheduler::default());

    let store = PropertyStore::builder(backend)
        .reload_policy(ReloadPolicy::OnAccessIfStale)
        .scheduler(Arc::new(scheduler.clone()))
        .build()
        .unwrap();

    assert!(scheduler.scheduled.lock().is_empty());
    assert!(store.refresh_handle().is_none());
}

// =============================================================================
// Reads
// =============================================================================

#[test]
fn test_missing_key_is_none() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend).build().unwrap();

    assert_eq!(store.get_property("nope").unwrap(), None);
    assert!(!store.contains_key("nope").unwrap());
    assert!(!store.is_empty().unwrap());
}

#[test]
fn test_snapshot_is_independent_of_later_writes() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend).build().unwrap();

    let snapshot = store.get_properties().unwrap();
    store.set_property("prop1", "Changed1").unwrap();

    assert_eq!(snapshot.get("prop1").map(String::as_str), Some("Line1"));
}

#[test]
fn test_never_policy_ignores_external_changes() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone())
        .update_policy(UpdatePolicy::SourceManaged)
        .build()
        .unwrap();

    backend.external_set("prop1", "Line1-Changed");

    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
    assert_eq!(backend.loads(), 1);
}

#[test]
fn test_stale_read_reloads_once() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone())
        .reload_policy(ReloadPolicy::OnAccessIfStale)
        .update_policy(UpdatePolicy::SourceManaged)
        .build()
        .unwrap();

    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
    assert_eq!(backend.loads(), 1);

    backend.external_set("prop1", "Line1-Changed");
    assert_eq!(
        store.get_property("prop1").unwrap().as_deref(),
        Some("Line1-Changed")
    );
    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1-Changed"));
    assert_eq!(backend.loads(), 2);
}

#[test]
fn test_on_access_with_local_only_never_checks_stamp() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone())
        .reload_policy(ReloadPolicy::OnAccessIfStale)
        .update_policy(UpdatePolicy::LocalOnly)
        .build()
        .unwrap();

    backend.external_set("prop1", "Line1-Changed");

    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
    assert_eq!(backend.stamps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failed_staleness_check_surfaces_source_unavailable() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone())
        .reload_policy(ReloadPolicy::OnAccessIfStale)
        .update_policy(UpdatePolicy::SourceManaged)
        .build()
        .unwrap();

    backend.fail_loads.store(true, Ordering::SeqCst);
    assert!(matches!(
        store.get_property("prop1"),
        Err(Error::SourceUnavailable { .. })
    ));

    backend.fail_loads.store(false, Ordering::SeqCst);
    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
}

#[test]
fn test_concurrent_stale_readers_reload_once() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = Arc::new(
        PropertyStore::builder(backend.clone())
            .reload_policy(ReloadPolicy::OnAccessIfStale)
            .update_policy(UpdatePolicy::SourceManaged)
            .build()
            .unwrap(),
    );

    *backend.load_delay.lock() = Some(Duration::from_millis(50));
    backend.external_set("prop1", "Line1-Changed");

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || store.get_property("prop1").unwrap())
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap().as_deref(), Some("Line1-Changed"));
    }

    assert_eq!(backend.loads(), 2);
}

// =============================================================================
// Writes
// =============================================================================

#[test]
fn test_upsert_keeps_other_keys() {
    let backend = MemoryBackend::with(&[("prop1", "Line1"), ("prop2", "Line2")]);
    let store = PropertyStore::builder(backend.clone()).build().unwrap();

    store.set_property("prop1", "Changed1").unwrap();

    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Changed1"));
    assert_eq!(store.get_property("prop2").unwrap().as_deref(), Some("Line2"));
    assert_eq!(backend.data.lock().get("prop1").map(String::as_str), Some("Changed1"));
}

#[test]
fn test_replace_drops_missing_keys() {
    let backend = MemoryBackend::with(&[("prop1", "Line1"), ("prop2", "Line2")]);
    let store = PropertyStore::builder(backend.clone()).build().unwrap();

    let replacement = props(&[("newProps1", "Line1"), ("prop3", "Line3")]);
    store.set_properties(replacement.clone(), true).unwrap();

    assert_eq!(store.get_property("prop1").unwrap(), None);
    assert_eq!(store.get_property("prop3").unwrap().as_deref(), Some("Line3"));
    assert_eq!(store.get_properties().unwrap(), replacement);
    assert_eq!(*backend.data.lock(), replacement);
}

#[test]
fn test_failed_write_leaves_cache_unchanged() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone()).build().unwrap();

    backend.fail_writes.store(true, Ordering::SeqCst);
    let err = store.set_property("prop1", "Changed1").unwrap_err();

    assert!(matches!(err, Error::Persistence { .. }));
    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
}

#[test]
fn test_source_managed_writes_are_noops() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone())
        .update_policy(UpdatePolicy::SourceManaged)
        .build()
        .unwrap();

    store.set_property("prop1", "Changed1").unwrap();
    store.set_properties(props(&[("x", "y")]), true).unwrap();

    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));
    assert_eq!(backend.data.lock().get("prop1").map(String::as_str), Some("Line1"));
    assert_eq!(backend.version.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Scheduled refresh
// =============================================================================

#[test]
fn test_tick_picks_up_external_change() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let (store, scheduler) = interval_store(&backend, UpdatePolicy::SourceManaged);

    backend.external_set("prop1", "Line1-Changed");
    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));

    assert!(scheduler.tick().iter().all(|r| r.is_ok()));
    assert_eq!(
        store.get_property("prop1").unwrap().as_deref(),
        Some("Line1-Changed")
    );
}

#[test]
fn test_failed_tick_keeps_previous_cache() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let (store, scheduler) = interval_store(&backend, UpdatePolicy::SourceManaged);

    backend.fail_loads.store(true, Ordering::SeqCst);
    let results = scheduler.tick();
    assert!(matches!(results[0], Err(Error::SourceUnavailable { .. })));
    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Line1"));

    backend.fail_loads.store(false, Ordering::SeqCst);
    backend.external_set("prop1", "Line1-Changed");
    scheduler.tick();
    assert_eq!(
        store.get_property("prop1").unwrap().as_deref(),
        Some("Line1-Changed")
    );

    let handle = store.refresh_handle().unwrap();
    assert_eq!(handle.runs(), 2);
    assert_eq!(handle.failures(), 1);
}

#[test]
fn test_local_write_then_tick_is_consistent() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let (store, scheduler) = interval_store(&backend, UpdatePolicy::LocalOnly);

    store.set_property("prop1", "Changed1").unwrap();
    scheduler.tick();

    assert_eq!(store.get_property("prop1").unwrap().as_deref(), Some("Changed1"));
}

#[test]
fn test_close_is_idempotent_and_stops_ticks() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let (store, scheduler) = interval_store(&backend, UpdatePolicy::SourceManaged);
    let handle = store.refresh_handle().unwrap();

    store.close();
    store.close();

    assert!(handle.is_cancelled());
    assert!(store.refresh_handle().is_none());
    assert!(scheduler.tick().is_empty());
}

#[test]
fn test_close_without_schedule_is_noop() {
    let backend = MemoryBackend::with(&[]);
    let store = PropertyStore::builder(backend).build().unwrap();
    store.close();
    store.close();
}

#[test]
fn test_dropped_store_cancels_its_refresh() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let (store, scheduler) = interval_store(&backend, UpdatePolicy::SourceManaged);
    let handle = store.refresh_handle().unwrap();
    drop(store);

    let before = backend.loads();
    assert!(scheduler.tick().iter().all(|r| r.is_ok()));
    assert_eq!(backend.loads(), before);
    assert!(handle.is_cancelled());
    assert!(scheduler.tick().is_empty());
}

// =============================================================================
// Snapshot consistency
// =============================================================================

fn numbered(prefix: &str, count: usize) -> Properties {
    (0..count)
        .map(|i| (format!("key.{i}"), format!("{prefix}-{i}")))
        .collect()
}

/// Runs `readers` threads checking every snapshot against `a` or `b` while
/// `mutate` flips the store between them. Returns the number of snapshots seen.
fn assert_whole_snapshots(
    store: &Arc<PropertyStore>,
    a: &Properties,
    b: &Properties,
    readers: usize,
    mutate: impl FnOnce(),
) -> usize {
    let done = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let (store, done, a, b) = (store.clone(), done.clone(), a.clone(), b.clone());
            std::thread::spawn(move || {
                let mut seen = 0;
                loop {
                    let finished = done.load(Ordering::SeqCst);
                    let snapshot = store.get_properties().unwrap();
                    assert!(snapshot == a || snapshot == b, "partial snapshot observed");
                    seen += 1;
                    if finished {
                        return seen;
                    }
                }
            })
        })
        .collect();

    mutate();
    done.store(true, Ordering::SeqCst);
    handles.into_iter().map(|h| h.join().unwrap()).sum()
}

#[test]
fn test_readers_never_see_half_applied_replace() {
    let a = numbered("a", 64);
    let b = numbered("b", 64);
    let backend = MemoryBackend::with(&[]);
    *backend.data.lock() = a.clone();
    let store = Arc::new(PropertyStore::builder(backend).build().unwrap());

    let seen = assert_whole_snapshots(&store, &a, &b, 4, || {
        for round in 0..100 {
            let next = if round % 2 == 0 { &b } else { &a };
            store.set_properties(next.clone(), true).unwrap();
        }
    });

    assert!(seen > 0);
}

#[test]
fn test_readers_never_see_half_applied_reload() {
    let a = numbered("a", 64);
    let b = numbered("b", 64);
    let backend = MemoryBackend::with(&[]);
    *backend.data.lock() = a.clone();
    let store = Arc::new(
        PropertyStore::builder(backend.clone())
            .update_policy(UpdatePolicy::SourceManaged)
            .build()
            .unwrap(),
    );

    let seen = assert_whole_snapshots(&store, &a, &b, 4, || {
        for round in 0..100 {
            let next = if round % 2 == 0 { &b } else { &a };
            *backend.data.lock() = next.clone();
            store.reload().unwrap();
        }
    });

    assert!(seen > 0);
}

#[test]
fn test_explicit_reload() {
    let backend = MemoryBackend::with(&[("prop1", "Line1")]);
    let store = PropertyStore::builder(backend.clone())
        .update_policy(UpdatePolicy::SourceManaged)
        .build()
        .unwrap();

    backend.external_set("prop2", "Line2");
    store.reload().unwrap();

    assert_eq!(store.get_property("prop2").unwrap().as_deref(), Some("Line2"));
}
