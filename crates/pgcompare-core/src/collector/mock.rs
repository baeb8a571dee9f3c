//! In-memory catalog source for testing the collector without a server.
//!
//! `MockCatalog` serves canned category data, and can be told to fail,
//! stall, or refuse connections per category. It counts every fetch so tests
//! can assert that nothing is retried.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::{CatalogSource, CategoryData, CollectError};
use crate::model::{Category, Collected, FailureKind, ServerSnapshot, Unavailability};

/// Canned catalog for tests.
#[derive(Debug, Default)]
pub struct MockCatalog {
    data: BTreeMap<Category, Result<CategoryData, CollectError>>,
    delays: BTreeMap<Category, Duration>,
    probe: Option<CollectError>,
    probe_delay: Duration,
    server_version_num: Option<i32>,
    max_concurrency: Option<usize>,
    fetches: Mutex<BTreeMap<Category, usize>>,
}

impl MockCatalog {
    /// Creates a catalog with no data; every fetch fails with a query error.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves exactly what `snapshot` contains. Unavailable categories fail
    /// with the matching error kind.
    pub fn from_snapshot(snapshot: &ServerSnapshot) -> Self {
        let mut mock = Self {
            server_version_num: snapshot
                .settings
                .get()
                .and_then(|s| s.server_version_num),
            ..Self::default()
        };
        mock.load(Category::Settings, &snapshot.settings, CategoryData::Settings);
        mock.load(Category::Connections, &snapshot.connections, CategoryData::Connections);
        mock.load(Category::Cache, &snapshot.cache, CategoryData::Cache);
        mock.load(Category::DatabaseSize, &snapshot.database_size, CategoryData::DatabaseSize);
        mock.load(Category::Tables, &snapshot.tables, CategoryData::Tables);
        mock.load(Category::Indexes, &snapshot.indexes, CategoryData::Indexes);
        mock.load(Category::Locks, &snapshot.locks, CategoryData::Locks);
        mock.load(Category::ActiveQueries, &snapshot.active_queries, CategoryData::ActiveQueries);
        mock.load(Category::LongQueries, &snapshot.long_queries, CategoryData::LongQueries);
        mock.load(Category::Bloat, &snapshot.bloat, CategoryData::Bloat);
        mock.load(Category::QueryIssues, &snapshot.query_issues, CategoryData::QueryIssues);
        mock.load(Category::Autovacuum, &snapshot.autovacuum, CategoryData::Autovacuum);
        mock
    }

    /// A server that refuses every connection.
    pub fn unreachable(reason: &str) -> Self {
        Self {
            probe: Some(CollectError::Connection(reason.to_string())),
            ..Self::default()
        }
    }

    fn load<T: Clone>(
        &mut self,
        category: Category,
        value: &Collected<T>,
        wrap: fn(T) -> CategoryData,
    ) {
        let result = match value {
            Collected::Available(v) => Ok(wrap(v.clone())),
            Collected::Unavailable(u) => Err(error_for(u)),
        };
        self.data.insert(category, result);
    }

    /// Sets the payload for one category.
    pub fn with_data(mut self, data: CategoryData) -> Self {
        self.data.insert(data.category(), Ok(data));
        self
    }

    /// Makes one category fail.
    pub fn with_failure(mut self, category: Category, error: CollectError) -> Self {
        self.data.insert(category, Err(error));
        self
    }

    /// Makes one category stall for `delay` before answering.
    pub fn with_delay(mut self, category: Category, delay: Duration) -> Self {
        self.delays.insert(category, delay);
        self
    }

    /// Makes every category stall for `delay`.
    pub fn with_delay_all(mut self, delay: Duration) -> Self {
        for category in Category::ALL {
            self.delays.insert(category, delay);
        }
        self
    }

    /// Makes the reachability probe stall for `delay`.
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Caps concurrent fetches, like a pool of `n` connections would.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Number of fetches issued for one category.
    pub fn fetch_count(&self, category: Category) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl CatalogSource for MockCatalog {
    fn probe(&self) -> Result<Option<i32>, CollectError> {
        if !self.probe_delay.is_zero() {
            thread::sleep(self.probe_delay);
        }
        match &self.probe {
            Some(err) => Err(err.clone()),
            None => Ok(self.server_version_num),
        }
    }

    fn fetch(
        &self,
        category: Category,
        _server_version_num: Option<i32>,
    ) -> Result<CategoryData, CollectError> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_insert(0) += 1;

        if let Some(delay) = self.delays.get(&category) {
            thread::sleep(*delay);
        }

        match self.data.get(&category) {
            Some(result) => result.clone(),
            None => Err(CollectError::Query(format!(
                "relation for {} does not exist",
                category.name()
            ))),
        }
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(Category::ALL.len())
    }
}

fn error_for(u: &Unavailability) -> CollectError {
    match u.kind {
        FailureKind::Connection => CollectError::Connection(u.reason.clone()),
        FailureKind::Timeout => CollectError::Timeout(u.reason.clone()),
        FailureKind::QueryError => CollectError::Query(u.reason.clone()),
        FailureKind::Cancelled => CollectError::Cancelled,
    }
}
