//! Snapshot collection.
//!
//! ```text
//! ┌──────────────────────── SnapshotCollector ─────────────────────────┐
//! │  probe ──► 12 category workers (one thread each)                   │
//! │              │  settings, connections, cache, size, tables, ...    │
//! │              ▼                                                     │
//! │        CatalogSource (trait)                                       │
//! │              │                                                     │
//! │     ┌────────┴─────────┐                                           │
//! │     ▼                  ▼                                           │
//! │  PgCatalog          MockCatalog                                    │
//! │  (ConnectionPool,   (tests)                                        │
//! │   ≤5 connections)                                                  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each category is fetched independently and bounded by the category
//! timeout. A failure or timeout marks only that category unavailable; an
//! unreachable server marks the whole snapshot unavailable. Nothing here
//! retries: a struggling server gets at most one query per category.

mod catalog;
#[allow(clippy::module_inception)]
mod collector;
pub mod mock;
mod pool;
mod queries;
mod rows;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{error, info};

use crate::model::{ComparativePair, FailureKind, Unavailability};

pub use catalog::{CatalogSource, CategoryData, ConnectionDescriptor, PgCatalog, PgConnector};
pub use collector::SnapshotCollector;
pub use mock::MockCatalog;
pub use pool::{ConnectionPool, Connector, Pooled};

/// Error type for catalog collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// Server unreachable or connection dropped.
    Connection(String),
    /// A time bound was exceeded (client-side or `statement_timeout`).
    Timeout(String),
    /// Query failed: permission denied, missing view, version mismatch.
    Query(String),
    /// The run was cancelled.
    Cancelled,
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Connection(msg) => write!(f, "PostgreSQL: {}", msg),
            CollectError::Timeout(msg) => write!(f, "PostgreSQL timeout: {}", msg),
            CollectError::Query(msg) => write!(f, "PostgreSQL query error: {}", msg),
            CollectError::Cancelled => write!(f, "collection cancelled"),
        }
    }
}

impl std::error::Error for CollectError {}

impl CollectError {
    /// Converts into the marker stored in the snapshot.
    pub fn into_unavailability(self) -> Unavailability {
        match self {
            CollectError::Connection(msg) => Unavailability::new(FailureKind::Connection, msg),
            CollectError::Timeout(msg) => Unavailability::new(FailureKind::Timeout, msg),
            CollectError::Query(msg) => Unavailability::new(FailureKind::QueryError, msg),
            CollectError::Cancelled => {
                Unavailability::new(FailureKind::Cancelled, "run cancelled before completion")
            }
        }
    }
}

/// Shared cancellation flag for one run. Cloning shares the flag.
#[derive(Clone, Default, Debug)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collects both servers concurrently.
///
/// The two collectors share nothing but the deadline and the cancellation
/// flag. Always returns a pair; a collector that panics yields a fully
/// unavailable snapshot for its side.
pub fn collect_pair<A: CatalogSource, B: CatalogSource>(
    baseline: &SnapshotCollector<A>,
    comparison: &SnapshotCollector<B>,
    deadline: Option<Instant>,
    cancel: &Cancellation,
) -> ComparativePair {
    let start = Instant::now();
    let (a, b) = thread::scope(|s| {
        let a = s.spawn(|| baseline.collect(deadline, cancel));
        let b = s.spawn(|| comparison.collect(deadline, cancel));
        (a.join(), b.join())
    });

    let a = a.unwrap_or_else(|_| {
        error!(server = %baseline.identity().label, "collector thread panicked");
        baseline.unavailable(CollectError::Connection("collector panicked".to_string()))
    });
    let b = b.unwrap_or_else(|_| {
        error!(server = %comparison.identity().label, "collector thread panicked");
        comparison.unavailable(CollectError::Connection("collector panicked".to_string()))
    });

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        baseline_missing = a.unavailable_categories().len(),
        comparison_missing = b.unavailable_categories().len(),
        "collection finished"
    );

    ComparativePair::new(a, b)
}
