use serde::{Deserialize, Serialize};

use super::postgres::{
    AutovacuumStats, BloatEntry, CacheStats, ConnectionStats, DatabaseSize, IndexStats,
    LockStats, ScanProfile, SessionQuery, Settings, TableSummary,
};
use super::{Category, Collected, Unavailability};

/// Which server this is and how to reach it (credentials excluded).
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Display label, e.g. "Server 1 (Fast)".
    pub label: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ServerIdentity {
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierClass {
    /// Time-limited CPU credits, degrades to a low baseline once exhausted.
    Burstable,
    GeneralPurpose,
    MemoryOptimized,
}

impl TierClass {
    pub fn label(self) -> &'static str {
        match self {
            TierClass::Burstable => "Burstable",
            TierClass::GeneralPurpose => "General Purpose",
            TierClass::MemoryOptimized => "Memory Optimized",
        }
    }
}

/// Compute tier descriptor. Not observable from the catalog; supplied by the
/// operator and `None` when unknown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputeTier {
    pub id: String,
    pub class: TierClass,
    pub vcores: u32,
    pub ram_gb: f64,
}

/// Storage tier descriptor, supplied by the operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageTier {
    pub id: String,
    pub iops: u32,
    pub size_gb: f64,
}

/// Point-in-time catalog state of one server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub identity: ServerIdentity,
    /// Epoch seconds when collection started.
    pub collected_at: i64,
    pub compute: Option<ComputeTier>,
    pub storage: Option<StorageTier>,
    pub settings: Collected<Settings>,
    pub connections: Collected<ConnectionStats>,
    pub cache: Collected<CacheStats>,
    pub database_size: Collected<DatabaseSize>,
    pub tables: Collected<TableSummary>,
    pub indexes: Collected<IndexStats>,
    pub locks: Collected<LockStats>,
    pub active_queries: Collected<Vec<SessionQuery>>,
    pub long_queries: Collected<Vec<SessionQuery>>,
    pub bloat: Collected<Vec<BloatEntry>>,
    pub query_issues: Collected<Vec<ScanProfile>>,
    pub autovacuum: Collected<AutovacuumStats>,
}

fn missing<T>(reason: &Unavailability) -> Collected<T> {
    Collected::Unavailable(reason.clone())
}

impl ServerSnapshot {
    /// A snapshot where every category carries the same failure, e.g. when
    /// the server could not be reached.
    pub fn unavailable(
        identity: ServerIdentity,
        collected_at: i64,
        compute: Option<ComputeTier>,
        storage: Option<StorageTier>,
        reason: Unavailability,
    ) -> Self {
        Self {
            identity,
            collected_at,
            compute,
            storage,
            settings: missing(&reason),
            connections: missing(&reason),
            cache: missing(&reason),
            database_size: missing(&reason),
            tables: missing(&reason),
            indexes: missing(&reason),
            locks: missing(&reason),
            active_queries: missing(&reason),
            long_queries: missing(&reason),
            bloat: missing(&reason),
            query_issues: missing(&reason),
            autovacuum: missing(&reason),
        }
    }

    /// Failure marker of a category, `None` when it was collected.
    pub fn status(&self, category: Category) -> Option<&Unavailability> {
        match category {
            Category::Settings => self.settings.unavailability(),
            Category::Connections => self.connections.unavailability(),
            Category::Cache => self.cache.unavailability(),
            Category::DatabaseSize => self.database_size.unavailability(),
            Category::Tables => self.tables.unavailability(),
            Category::Indexes => self.indexes.unavailability(),
            Category::Locks => self.locks.unavailability(),
            Category::ActiveQueries => self.active_queries.unavailability(),
            Category::LongQueries => self.long_queries.unavailability(),
            Category::Bloat => self.bloat.unavailability(),
            Category::QueryIssues => self.query_issues.unavailability(),
            Category::Autovacuum => self.autovacuum.unavailability(),
        }
    }

    /// Replaces a category slot with a failure marker.
    pub fn set_unavailable(&mut self, category: Category, reason: Unavailability) {
        match category {
            Category::Settings => self.settings = Collected::Unavailable(reason),
            Category::Connections => self.connections = Collected::Unavailable(reason),
            Category::Cache => self.cache = Collected::Unavailable(reason),
            Category::DatabaseSize => self.database_size = Collected::Unavailable(reason),
            Category::Tables => self.tables = Collected::Unavailable(reason),
            Category::Indexes => self.indexes = Collected::Unavailable(reason),
            Category::Locks => self.locks = Collected::Unavailable(reason),
            Category::ActiveQueries => self.active_queries = Collected::Unavailable(reason),
            Category::LongQueries => self.long_queries = Collected::Unavailable(reason),
            Category::Bloat => self.bloat = Collected::Unavailable(reason),
            Category::QueryIssues => self.query_issues = Collected::Unavailable(reason),
            Category::Autovacuum => self.autovacuum = Collected::Unavailable(reason),
        }
    }

    /// Categories that failed, in `Category::ALL` order.
    pub fn unavailable_categories(&self) -> Vec<(Category, &Unavailability)> {
        Category::ALL
            .iter()
            .filter_map(|&c| self.status(c).map(|u| (c, u)))
            .collect()
    }

    pub fn is_fully_unavailable(&self) -> bool {
        Category::ALL.iter().all(|&c| self.status(c).is_some())
    }

    pub fn database_gb(&self) -> Option<f64> {
        self.database_size.get().map(DatabaseSize::gb)
    }

    pub fn ram_gb(&self) -> Option<f64> {
        self.compute.as_ref().map(|c| c.ram_gb)
    }

    pub fn heap_hit_pct(&self) -> Option<f64> {
        self.cache.get().and_then(CacheStats::heap_hit_pct)
    }

    /// Provisioned IOPS per GB of data. Needs both a storage descriptor and a
    /// collected database size.
    pub fn iops_per_gb(&self) -> Option<f64> {
        let iops = self.storage.as_ref()?.iops as f64;
        let gb = self.database_gb()?;
        (gb > 0.0).then(|| iops / gb)
    }

    /// RAM as a percentage of database size.
    pub fn ram_to_data_pct(&self) -> Option<f64> {
        let ram = self.ram_gb()?;
        let gb = self.database_gb()?;
        (gb > 0.0).then(|| ram * 100.0 / gb)
    }

    /// Longest running query in seconds, over the long-query list.
    pub fn longest_query_secs(&self) -> Option<f64> {
        self.long_queries
            .get()?
            .iter()
            .map(|q| q.duration_secs)
            .reduce(f64::max)
    }
}
