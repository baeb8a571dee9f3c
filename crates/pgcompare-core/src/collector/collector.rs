//! Per-server snapshot collection.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Cancellation, CatalogSource, CategoryData, CollectError};
use crate::model::{
    Category, ComputeTier, FailureKind, ServerIdentity, ServerSnapshot, StorageTier,
    Unavailability,
};

/// How often a waiting collector re-checks the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

enum Event {
    /// The worker holds a slot and is about to query; its clock starts here.
    Started(Category, Instant),
    Finished(Category, Result<CategoryData, CollectError>, Duration),
}

enum Wait<T> {
    Ready(T),
    TimedOut,
    Cancelled,
    /// Every sender is gone without delivering.
    Lost,
}

/// Waits for the next message until `cutoff`, polling the cancellation flag.
fn wait_for<T>(rx: &Receiver<T>, cutoff: Instant, cancel: &Cancellation) -> Wait<T> {
    loop {
        let slice = cutoff
            .saturating_duration_since(Instant::now())
            .min(POLL_INTERVAL);
        match rx.recv_timeout(slice) {
            Ok(v) => return Wait::Ready(v),
            Err(RecvTimeoutError::Disconnected) => return Wait::Lost,
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return Wait::Cancelled;
                }
                if Instant::now() >= cutoff {
                    return Wait::TimedOut;
                }
            }
        }
    }
}

/// Query slots shared by the category workers of one run, sized to the
/// source's [`CatalogSource::max_concurrency`]. A worker only starts its
/// query (and its timeout) once it holds a slot, so categories queued behind
/// a small pool are not charged for the wait.
struct Slots {
    free: Mutex<usize>,
    released: Condvar,
}

impl Slots {
    fn new(n: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(n.max(1)),
            released: Condvar::new(),
        })
    }

    /// Waits for a free slot. `None` once `give_up` passes or the run is
    /// cancelled.
    fn acquire(self: &Arc<Self>, give_up: Instant, cancel: &Cancellation) -> Option<Slot> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *free > 0 {
                *free -= 1;
                return Some(Slot(Arc::clone(self)));
            }
            let now = Instant::now();
            if now >= give_up || cancel.is_cancelled() {
                return None;
            }
            free = self
                .released
                .wait_timeout(free, (give_up - now).min(POLL_INTERVAL))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

struct Slot(Arc<Slots>);

impl Drop for Slot {
    fn drop(&mut self) {
        let mut free = self.0.free.lock().unwrap_or_else(PoisonError::into_inner);
        *free += 1;
        drop(free);
        self.0.released.notify_one();
    }
}

/// Collects one [`ServerSnapshot`] from a [`CatalogSource`].
///
/// Each category runs on its own worker thread, at most
/// `max_concurrency` at a time. A category's timeout starts when its query
/// starts; categories still running past it (or past the run deadline) are
/// marked timed out and their workers abandoned. A source that enforces the
/// same bound server-side (as `PgCatalog` does via `statement_timeout`)
/// stops them soon after.
///
/// Waiting for a slot is bounded separately: long enough for every category
/// to run back to back in `ceil(12 / max_concurrency)` rounds.
pub struct SnapshotCollector<S: CatalogSource> {
    source: Arc<S>,
    identity: ServerIdentity,
    compute: Option<ComputeTier>,
    storage: Option<StorageTier>,
    category_timeout: Duration,
}

impl<S: CatalogSource> SnapshotCollector<S> {
    pub fn new(
        source: S,
        identity: ServerIdentity,
        compute: Option<ComputeTier>,
        storage: Option<StorageTier>,
        category_timeout: Duration,
    ) -> Self {
        Self {
            source: Arc::new(source),
            identity,
            compute,
            storage,
            category_timeout,
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// A snapshot with every category carrying `error`.
    pub fn unavailable(&self, error: CollectError) -> ServerSnapshot {
        ServerSnapshot::unavailable(
            self.identity.clone(),
            Utc::now().timestamp(),
            self.compute.clone(),
            self.storage.clone(),
            error.into_unavailability(),
        )
    }

    fn cutoff(&self, from: Instant, deadline: Option<Instant>) -> Instant {
        let own = from + self.category_timeout;
        deadline.map_or(own, |d| own.min(d))
    }

    /// Longest a category may wait for a slot.
    fn queue_wait(&self, slots: usize) -> Duration {
        let rounds = Category::ALL.len().div_ceil(slots.max(1));
        self.category_timeout * rounds as u32
    }

    /// Runs one collection. Never fails: every problem is recorded in the
    /// returned snapshot.
    pub fn collect(&self, deadline: Option<Instant>, cancel: &Cancellation) -> ServerSnapshot {
        let started = Instant::now();
        let server = self.identity.label.as_str();

        if cancel.is_cancelled() {
            return self.unavailable(CollectError::Cancelled);
        }

        let server_version_num = match self.probe(deadline, cancel) {
            Ok(v) => v,
            Err(e) => {
                warn!(server, error = %e, "server unreachable, skipping all categories");
                return self.unavailable(e);
            }
        };

        let mut snapshot = ServerSnapshot::unavailable(
            self.identity.clone(),
            Utc::now().timestamp(),
            self.compute.clone(),
            self.storage.clone(),
            Unavailability::new(FailureKind::Cancelled, "not collected"),
        );

        let concurrency = self.source.max_concurrency().clamp(1, Category::ALL.len());
        let slots = Slots::new(concurrency);
        let queue_wait = self.queue_wait(concurrency);
        let spawned_at = Instant::now();
        let queue_cutoff = {
            let own = spawned_at + queue_wait;
            deadline.map_or(own, |d| own.min(d))
        };
        let timeout_reason = |query_started: Option<Instant>| {
            let (own_limit, limit, what) = match query_started {
                Some(at) => (at + self.category_timeout, self.category_timeout, "no result"),
                None => (spawned_at + queue_wait, queue_wait, "no free connection"),
            };
            if deadline.is_some_and(|d| d <= own_limit) {
                "run deadline reached".to_string()
            } else {
                format!("{} within {}ms", what, limit.as_millis())
            }
        };

        debug!(server, concurrency, "starting category workers");
        let (tx, rx) = mpsc::channel::<Event>();
        // Category and, once its query began, the start instant.
        let mut pending: Vec<(Category, Option<Instant>)> =
            Vec::with_capacity(Category::ALL.len());

        for category in Category::ALL {
            let tx = tx.clone();
            let source = Arc::clone(&self.source);
            let cancel = cancel.clone();
            let slots = Arc::clone(&slots);
            let queued_reason = timeout_reason(None);
            let spawn = thread::Builder::new()
                .name(format!("collect-{}", category.name()))
                .spawn(move || {
                    let Some(_slot) = slots.acquire(queue_cutoff, &cancel) else {
                        let err = if cancel.is_cancelled() {
                            CollectError::Cancelled
                        } else {
                            CollectError::Timeout(queued_reason)
                        };
                        let _ = tx.send(Event::Finished(category, Err(err), Duration::ZERO));
                        return;
                    };
                    let start = Instant::now();
                    let _ = tx.send(Event::Started(category, start));
                    let result = if cancel.is_cancelled() {
                        Err(CollectError::Cancelled)
                    } else {
                        source.fetch(category, server_version_num)
                    };
                    let _ = tx.send(Event::Finished(category, result, start.elapsed()));
                });
            match spawn {
                Ok(_) => pending.push((category, None)),
                Err(e) => snapshot.set_unavailable(
                    category,
                    Unavailability::new(
                        FailureKind::QueryError,
                        format!("failed to start worker: {e}"),
                    ),
                ),
            }
        }
        drop(tx);

        while !pending.is_empty() {
            let next_cutoff = pending
                .iter()
                .map(|(_, at)| at.map_or(queue_cutoff, |at| self.cutoff(at, deadline)))
                .min()
                .unwrap_or(queue_cutoff);

            match wait_for(&rx, next_cutoff, cancel) {
                Wait::Ready(Event::Started(category, at)) => {
                    if let Some(entry) = pending.iter_mut().find(|(c, _)| *c == category) {
                        entry.1 = Some(at);
                    }
                }
                Wait::Ready(Event::Finished(category, result, elapsed)) => {
                    let Some(i) = pending.iter().position(|(c, _)| *c == category) else {
                        continue;
                    };
                    pending.remove(i);
                    match result {
                        Ok(data) => {
                            debug!(
                                server,
                                category = category.name(),
                                elapsed_ms = elapsed.as_millis() as u64,
                                "category collected"
                            );
                            data.apply(&mut snapshot);
                        }
                        Err(e) => {
                            warn!(server, category = category.name(), error = %e, "category unavailable");
                            snapshot.set_unavailable(category, e.into_unavailability());
                        }
                    }
                }
                Wait::TimedOut => {
                    let now = Instant::now();
                    let (expired, rest): (Vec<_>, Vec<_>) =
                        pending.into_iter().partition(|(_, at)| {
                            at.map_or(queue_cutoff, |at| self.cutoff(at, deadline)) <= now
                        });
                    pending = rest;
                    for (category, at) in expired {
                        let reason = timeout_reason(at);
                        self.mark_pending(
                            &mut snapshot,
                            &[category],
                            FailureKind::Timeout,
                            &reason,
                        );
                    }
                }
                Wait::Cancelled => {
                    let reason = "run cancelled before completion";
                    let left: Vec<Category> = pending.iter().map(|(c, _)| *c).collect();
                    self.mark_pending(&mut snapshot, &left, FailureKind::Cancelled, reason);
                    break;
                }
                Wait::Lost => {
                    let reason = "worker exited without a result";
                    let left: Vec<Category> = pending.iter().map(|(c, _)| *c).collect();
                    self.mark_pending(&mut snapshot, &left, FailureKind::QueryError, reason);
                    break;
                }
            }
        }

        info!(
            server,
            elapsed_ms = started.elapsed().as_millis() as u64,
            unavailable = snapshot.unavailable_categories().len(),
            "snapshot collected"
        );
        snapshot
    }

    fn mark_pending(
        &self,
        snapshot: &mut ServerSnapshot,
        pending: &[Category],
        kind: FailureKind,
        reason: &str,
    ) {
        for &category in pending {
            warn!(
                server = %self.identity.label,
                category = category.name(),
                kind = kind.label(),
                "category unavailable"
            );
            snapshot.set_unavailable(category, Unavailability::new(kind, reason));
        }
    }

    /// Checks reachability within the category timeout. Any failure here,
    /// including a timeout, counts as a connection failure.
    fn probe(
        &self,
        deadline: Option<Instant>,
        cancel: &Cancellation,
    ) -> Result<Option<i32>, CollectError> {
        let cutoff = self.cutoff(Instant::now(), deadline);
        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        thread::Builder::new()
            .name("collect-probe".to_string())
            .spawn(move || {
                let _ = tx.send(source.probe());
            })
            .map_err(|e| CollectError::Connection(format!("failed to start probe: {e}")))?;

        match wait_for(&rx, cutoff, cancel) {
            Wait::Ready(Ok(v)) => Ok(v),
            Wait::Ready(Err(CollectError::Cancelled)) | Wait::Cancelled => {
                Err(CollectError::Cancelled)
            }
            Wait::Ready(Err(
                CollectError::Connection(msg) | CollectError::Timeout(msg) | CollectError::Query(msg),
            )) => Err(CollectError::Connection(msg)),
            Wait::TimedOut => Err(CollectError::Connection(format!(
                "connection probe timed out after {}ms",
                self.category_timeout.as_millis()
            ))),
            Wait::Lost => Err(CollectError::Connection("probe exited without a result".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{ConnectionPool, Connector, MockCatalog};
    use crate::scenarios;

    struct NullConnector;

    impl Connector for NullConnector {
        type Connection = ();

        fn connect(&self) -> Result<(), CollectError> {
            Ok(())
        }
    }

    /// Answers from `inner`, holding a pooled connection for `query_time`
    /// per fetch the way `PgCatalog` does.
    struct PooledCatalog {
        pool: ConnectionPool<NullConnector>,
        inner: MockCatalog,
        query_time: Duration,
        acquire_timeout: Duration,
    }

    impl CatalogSource for PooledCatalog {
        fn probe(&self) -> Result<Option<i32>, CollectError> {
            self.inner.probe()
        }

        fn fetch(&self, category: Category, v: Option<i32>) -> Result<CategoryData, CollectError> {
            let _conn = self.pool.acquire(self.acquire_timeout)?;
            thread::sleep(self.query_time);
            self.inner.fetch(category, v)
        }

        fn max_concurrency(&self) -> usize {
            self.pool.max_size()
        }
    }

    fn pooled(pool_size: usize, query_ms: u64, timeout_ms: u64) -> SnapshotCollector<PooledCatalog> {
        let source = PooledCatalog {
            pool: ConnectionPool::new(NullConnector, pool_size),
            inner: MockCatalog::from_snapshot(&scenarios::fast_server()),
            query_time: Duration::from_millis(query_ms),
            acquire_timeout: Duration::from_millis(timeout_ms),
        };
        SnapshotCollector::new(
            source,
            scenarios::fast_server().identity,
            None,
            None,
            Duration::from_millis(timeout_ms),
        )
    }

    fn collector(mock: MockCatalog, timeout_ms: u64) -> SnapshotCollector<MockCatalog> {
        SnapshotCollector::new(
            mock,
            scenarios::fast_server().identity,
            None,
            None,
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn collects_every_category() {
        let fixture = scenarios::fast_server();
        let c = collector(MockCatalog::from_snapshot(&fixture), 1000);

        let snap = c.collect(None, &Cancellation::new());

        assert!(snap.unavailable_categories().is_empty());
        assert_eq!(snap.cache, fixture.cache);
        assert_eq!(snap.settings, fixture.settings);
        assert_eq!(snap.autovacuum, fixture.autovacuum);
    }

    #[test]
    fn query_error_marks_only_that_category() {
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server()).with_failure(
            Category::Bloat,
            CollectError::Query("permission denied for table pg_stat_user_tables".into()),
        );
        let c = collector(mock, 1000);

        let snap = c.collect(None, &Cancellation::new());

        let missing = snap.unavailable_categories();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, Category::Bloat);
        assert_eq!(missing[0].1.kind, FailureKind::QueryError);
        assert!(missing[0].1.reason.contains("permission denied"));
    }

    #[test]
    fn slow_category_times_out_without_blocking_the_rest() {
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server())
            .with_delay(Category::Locks, Duration::from_millis(2000));
        let c = collector(mock, 150);

        let start = Instant::now();
        let snap = c.collect(None, &Cancellation::new());

        assert!(start.elapsed() < Duration::from_millis(1500));
        assert_eq!(snap.status(Category::Locks).unwrap().kind, FailureKind::Timeout);
        assert!(snap.cache.is_available());
        assert_eq!(snap.unavailable_categories().len(), 1);
    }

    #[test]
    fn small_pool_does_not_eat_into_category_timeout() {
        // 12 categories over 3 connections run in four rounds of 400ms;
        // each query alone stays well inside its 1000ms bound.
        let c = pooled(3, 400, 1000);

        let snap = c.collect(None, &Cancellation::new());

        assert!(
            snap.unavailable_categories().is_empty(),
            "{:?}",
            snap.unavailable_categories()
        );
        assert_eq!(c.source().inner.total_fetches(), Category::ALL.len());
        assert!(c.source().pool.open_connections() <= 3);
    }

    #[test]
    fn pooled_query_past_its_own_bound_still_times_out() {
        let c = pooled(3, 600, 300);

        let snap = c.collect(None, &Cancellation::new());

        assert!(snap.is_fully_unavailable());
        for category in Category::ALL {
            assert_eq!(snap.status(category).unwrap().kind, FailureKind::Timeout);
        }
        assert!(
            Category::ALL
                .iter()
                .any(|&cat| snap.status(cat).unwrap().reason == "no result within 300ms")
        );
    }

    #[test]
    fn queued_categories_give_up_after_every_round_could_have_run() {
        // A single slot held by a hung query: the rest wait for twelve rounds
        // of 50ms and then report that no connection came free.
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server())
            .with_max_concurrency(1)
            .with_delay_all(Duration::from_millis(5000));
        let c = collector(mock, 50);

        let start = Instant::now();
        let snap = c.collect(None, &Cancellation::new());

        assert!(start.elapsed() < Duration::from_millis(3000));
        assert!(snap.is_fully_unavailable());
        let reasons: Vec<&str> = Category::ALL
            .iter()
            .map(|&cat| snap.status(cat).unwrap().reason.as_str())
            .collect();
        assert_eq!(reasons.iter().filter(|r| **r == "no result within 50ms").count(), 1);
        assert!(reasons.contains(&"no free connection within 600ms"));
    }

    #[test]
    fn run_deadline_caps_category_timeout() {
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server())
            .with_delay(Category::Indexes, Duration::from_millis(2000));
        let c = collector(mock, 5000);

        let deadline = Instant::now() + Duration::from_millis(200);
        let snap = c.collect(Some(deadline), &Cancellation::new());

        let u = snap.status(Category::Indexes).unwrap();
        assert_eq!(u.kind, FailureKind::Timeout);
        assert_eq!(u.reason, "run deadline reached");
    }

    #[test]
    fn unreachable_server_fetches_nothing() {
        let c = collector(MockCatalog::unreachable("connection refused"), 500);

        let snap = c.collect(None, &Cancellation::new());

        assert!(snap.is_fully_unavailable());
        assert_eq!(snap.status(Category::Settings).unwrap().kind, FailureKind::Connection);
        assert_eq!(c.source().total_fetches(), 0);
    }

    #[test]
    fn hanging_probe_is_a_connection_failure() {
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server())
            .with_probe_delay(Duration::from_millis(2000));
        let c = collector(mock, 100);

        let snap = c.collect(None, &Cancellation::new());

        assert!(snap.is_fully_unavailable());
        let u = snap.status(Category::Cache).unwrap();
        assert_eq!(u.kind, FailureKind::Connection);
        assert!(u.reason.contains("timed out"));
    }

    #[test]
    fn failed_category_is_not_retried() {
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server())
            .with_failure(Category::Cache, CollectError::Timeout("canceling statement".into()));
        let c = collector(mock, 1000);

        let snap = c.collect(None, &Cancellation::new());

        assert_eq!(snap.status(Category::Cache).unwrap().kind, FailureKind::Timeout);
        assert_eq!(c.source().fetch_count(Category::Cache), 1);
        assert_eq!(c.source().total_fetches(), Category::ALL.len());
    }

    #[test]
    fn cancel_mid_run_keeps_finished_categories() {
        let mock = MockCatalog::from_snapshot(&scenarios::fast_server())
            .with_delay(Category::Autovacuum, Duration::from_millis(3000));
        let c = collector(mock, 5000);
        let cancel = Cancellation::new();

        let snap = thread::scope(|s| {
            let run = s.spawn(|| c.collect(None, &cancel));
            thread::sleep(Duration::from_millis(200));
            cancel.cancel();
            run.join().unwrap()
        });

        assert_eq!(
            snap.status(Category::Autovacuum).unwrap().kind,
            FailureKind::Cancelled
        );
        assert!(snap.settings.is_available());
    }
}
