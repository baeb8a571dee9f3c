//! Snapshot data model.
//!
//! A [`ServerSnapshot`] is the immutable result of one collection run against
//! one server. Every metric category is wrapped in [`Collected`] so that a
//! failed or timed-out sub-query is an explicit value, never a zero or an
//! empty string standing in for "we don't know".

mod pair;
mod postgres;
mod snapshot;

use serde::{Deserialize, Serialize};

pub use pair::{ComparativePair, Side};
pub use postgres::{
    AutovacuumStats, BloatEntry, BufferLevel, CacheStats, ConnectionStats, DatabaseSize,
    IndexStats, IndexUsage, LockStats, PgSetting, ScanProfile, SessionQuery, Settings,
    TableSummary, VacuumStats,
};
pub use snapshot::{ComputeTier, ServerIdentity, ServerSnapshot, StorageTier, TierClass};

/// Metric categories, each fetched independently by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Settings,
    Connections,
    Cache,
    DatabaseSize,
    Tables,
    Indexes,
    Locks,
    ActiveQueries,
    LongQueries,
    Bloat,
    QueryIssues,
    Autovacuum,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Settings,
        Category::Connections,
        Category::Cache,
        Category::DatabaseSize,
        Category::Tables,
        Category::Indexes,
        Category::Locks,
        Category::ActiveQueries,
        Category::LongQueries,
        Category::Bloat,
        Category::QueryIssues,
        Category::Autovacuum,
    ];

    /// Short machine name, used in log fields.
    pub fn name(self) -> &'static str {
        match self {
            Category::Settings => "settings",
            Category::Connections => "connections",
            Category::Cache => "cache",
            Category::DatabaseSize => "database_size",
            Category::Tables => "tables",
            Category::Indexes => "indexes",
            Category::Locks => "locks",
            Category::ActiveQueries => "active_queries",
            Category::LongQueries => "long_queries",
            Category::Bloat => "bloat",
            Category::QueryIssues => "query_issues",
            Category::Autovacuum => "autovacuum",
        }
    }

    /// Human-readable title, used in the report.
    pub fn title(self) -> &'static str {
        match self {
            Category::Settings => "Configuration",
            Category::Connections => "Connection Statistics",
            Category::Cache => "Cache Hit Ratio",
            Category::DatabaseSize => "Database Size",
            Category::Tables => "Table Statistics",
            Category::Indexes => "Index Statistics",
            Category::Locks => "Lock Statistics",
            Category::ActiveQueries => "Active Queries",
            Category::LongQueries => "Long Running Queries",
            Category::Bloat => "Table Bloat",
            Category::QueryIssues => "Query Performance Issues",
            Category::Autovacuum => "Autovacuum Statistics",
        }
    }
}

/// Why a category has no data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server could not be reached at all.
    Connection,
    /// The category exceeded its time bound.
    Timeout,
    /// The catalog query failed (permission, missing view, version mismatch).
    QueryError,
    /// The run was cancelled before the category finished.
    Cancelled,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Connection => "connection failed",
            FailureKind::Timeout => "timed out",
            FailureKind::QueryError => "query error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unavailability {
    pub kind: FailureKind,
    pub reason: String,
}

impl Unavailability {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Unavailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.reason)
    }
}

/// A metric category value, or the recorded reason it is missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Collected<T> {
    Available(T),
    Unavailable(Unavailability),
}

impl<T> Collected<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            Collected::Available(v) => Some(v),
            Collected::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Collected::Available(_))
    }

    pub fn unavailability(&self) -> Option<&Unavailability> {
        match self {
            Collected::Available(_) => None,
            Collected::Unavailable(u) => Some(u),
        }
    }
}
