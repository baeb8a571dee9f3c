//! Catalog access abstraction.
//!
//! [`CatalogSource`] is the seam between the collector and PostgreSQL:
//! [`PgCatalog`] queries a live server through a bounded pool, while
//! [`MockCatalog`](super::MockCatalog) serves canned data in tests.

use std::time::Duration;

use postgres::error::SqlState;
use postgres::{Client, NoTls};
use tracing::debug;

use super::pool::{ConnectionPool, Connector};
use super::{CollectError, queries, rows};
use crate::model::{
    AutovacuumStats, BloatEntry, CacheStats, Category, Collected, ConnectionStats, DatabaseSize,
    IndexStats, LockStats, ScanProfile, ServerSnapshot, SessionQuery, Settings, TableSummary,
};

/// Source of catalog data for one server.
///
/// Implementations are shared between category worker threads, hence
/// `Send + Sync + 'static`.
pub trait CatalogSource: Send + Sync + 'static {
    /// Checks reachability. Returns `server_version_num` when known.
    fn probe(&self) -> Result<Option<i32>, CollectError>;

    /// Fetches one metric category.
    fn fetch(
        &self,
        category: Category,
        server_version_num: Option<i32>,
    ) -> Result<CategoryData, CollectError>;

    /// Fetches that can run at once without queueing inside the source.
    fn max_concurrency(&self) -> usize {
        Category::ALL.len()
    }
}

/// Result payload of one category fetch.
#[derive(Clone, Debug, PartialEq)]
pub enum CategoryData {
    Settings(Settings),
    Connections(ConnectionStats),
    Cache(CacheStats),
    DatabaseSize(DatabaseSize),
    Tables(TableSummary),
    Indexes(IndexStats),
    Locks(LockStats),
    ActiveQueries(Vec<SessionQuery>),
    LongQueries(Vec<SessionQuery>),
    Bloat(Vec<BloatEntry>),
    QueryIssues(Vec<ScanProfile>),
    Autovacuum(AutovacuumStats),
}

impl CategoryData {
    pub fn category(&self) -> Category {
        match self {
            CategoryData::Settings(_) => Category::Settings,
            CategoryData::Connections(_) => Category::Connections,
            CategoryData::Cache(_) => Category::Cache,
            CategoryData::DatabaseSize(_) => Category::DatabaseSize,
            CategoryData::Tables(_) => Category::Tables,
            CategoryData::Indexes(_) => Category::Indexes,
            CategoryData::Locks(_) => Category::Locks,
            CategoryData::ActiveQueries(_) => Category::ActiveQueries,
            CategoryData::LongQueries(_) => Category::LongQueries,
            CategoryData::Bloat(_) => Category::Bloat,
            CategoryData::QueryIssues(_) => Category::QueryIssues,
            CategoryData::Autovacuum(_) => Category::Autovacuum,
        }
    }

    /// Stores the payload into its category slot of `snapshot`.
    pub fn apply(self, snapshot: &mut ServerSnapshot) {
        match self {
            CategoryData::Settings(v) => snapshot.settings = Collected::Available(v),
            CategoryData::Connections(v) => snapshot.connections = Collected::Available(v),
            CategoryData::Cache(v) => snapshot.cache = Collected::Available(v),
            CategoryData::DatabaseSize(v) => snapshot.database_size = Collected::Available(v),
            CategoryData::Tables(v) => snapshot.tables = Collected::Available(v),
            CategoryData::Indexes(v) => snapshot.indexes = Collected::Available(v),
            CategoryData::Locks(v) => snapshot.locks = Collected::Available(v),
            CategoryData::ActiveQueries(v) => snapshot.active_queries = Collected::Available(v),
            CategoryData::LongQueries(v) => snapshot.long_queries = Collected::Available(v),
            CategoryData::Bloat(v) => snapshot.bloat = Collected::Available(v),
            CategoryData::QueryIssues(v) => snapshot.query_issues = Collected::Available(v),
            CategoryData::Autovacuum(v) => snapshot.autovacuum = Collected::Available(v),
        }
    }
}

/// Where and as whom to connect. The password is never logged.
#[derive(Clone, Default)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Opens `postgres::Client` connections with the run's time bounds applied
/// server-side.
pub struct PgConnector {
    descriptor: ConnectionDescriptor,
    connect_timeout: Duration,
    statement_timeout: Duration,
}

impl PgConnector {
    pub fn new(
        descriptor: ConnectionDescriptor,
        connect_timeout: Duration,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            connect_timeout,
            statement_timeout,
        }
    }

    fn config(&self) -> postgres::Config {
        let d = &self.descriptor;
        let mut config = postgres::Config::new();
        config
            .host(&d.host)
            .port(d.port)
            .dbname(&d.database)
            .user(&d.user)
            .application_name("pgcompare")
            .connect_timeout(self.connect_timeout)
            .options(&format!(
                "-c statement_timeout={}",
                self.statement_timeout.as_millis()
            ));
        if let Some(password) = &d.password {
            config.password(password);
        }
        config
    }
}

impl Connector for PgConnector {
    type Connection = Client;

    fn connect(&self) -> Result<Client, CollectError> {
        self.config()
            .connect(NoTls)
            .map_err(|e| CollectError::Connection(format_postgres_error(&e)))
    }
}

/// Live catalog source over a bounded connection pool.
pub struct PgCatalog {
    pool: ConnectionPool<PgConnector>,
    acquire_timeout: Duration,
}

impl PgCatalog {
    /// `pool_size` caps concurrent connections to this server;
    /// `category_timeout` bounds both connection acquisition and each query.
    pub fn new(
        descriptor: ConnectionDescriptor,
        pool_size: usize,
        connect_timeout: Duration,
        category_timeout: Duration,
    ) -> Self {
        let connector = PgConnector::new(descriptor, connect_timeout, category_timeout);
        Self {
            pool: ConnectionPool::new(connector, pool_size),
            acquire_timeout: category_timeout,
        }
    }

    fn with_client<T>(
        &self,
        f: impl FnOnce(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, CollectError> {
        let mut conn = self.pool.acquire(self.acquire_timeout)?;
        match f(&mut *conn) {
            Ok(v) => Ok(v),
            Err(e) => {
                if e.is_closed() || conn.is_closed() {
                    conn.mark_broken();
                }
                Err(classify_postgres_error(&e))
            }
        }
    }
}

impl CatalogSource for PgCatalog {
    fn probe(&self) -> Result<Option<i32>, CollectError> {
        let version: i32 = self
            .with_client(|c| c.query_one(queries::PROBE_QUERY, &[])?.try_get(0))
            .map_err(|e| match e {
                CollectError::Query(msg) | CollectError::Timeout(msg) => {
                    CollectError::Connection(msg)
                }
                other => other,
            })?;
        debug!(server_version_num = version, "probe succeeded");
        Ok(Some(version))
    }

    fn fetch(
        &self,
        category: Category,
        v: Option<i32>,
    ) -> Result<CategoryData, CollectError> {
        self.with_client(|c| {
            Ok(match category {
                Category::Settings => CategoryData::Settings(rows::settings(c)?),
                Category::Connections => CategoryData::Connections(rows::connections(c, v)?),
                Category::Cache => CategoryData::Cache(rows::cache(c)?),
                Category::DatabaseSize => CategoryData::DatabaseSize(rows::database_size(c)?),
                Category::Tables => CategoryData::Tables(rows::tables(c)?),
                Category::Indexes => CategoryData::Indexes(rows::indexes(c)?),
                Category::Locks => CategoryData::Locks(rows::locks(c, v)?),
                Category::ActiveQueries => {
                    CategoryData::ActiveQueries(rows::active_queries(c, v)?)
                }
                Category::LongQueries => CategoryData::LongQueries(rows::long_queries(c, v)?),
                Category::Bloat => CategoryData::Bloat(rows::bloat(c)?),
                Category::QueryIssues => CategoryData::QueryIssues(rows::scan_profiles(c)?),
                Category::Autovacuum => CategoryData::Autovacuum(rows::autovacuum(c)?),
            })
        })
    }

    fn max_concurrency(&self) -> usize {
        self.pool.max_size()
    }
}

/// Maps a client error onto the collection failure taxonomy.
fn classify_postgres_error(e: &postgres::Error) -> CollectError {
    let msg = format_postgres_error(e);
    match e.code() {
        Some(code) if *code == SqlState::QUERY_CANCELED => CollectError::Timeout(msg),
        Some(_) => CollectError::Query(msg),
        None if e.is_closed() => CollectError::Connection(msg),
        None if e.as_db_error().is_none() && msg.contains("timed out") => {
            CollectError::Timeout(msg)
        }
        None => CollectError::Query(msg),
    }
}

/// Formats a postgres error into a short, user-facing message.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServerIdentity, Unavailability};

    #[test]
    fn descriptor_debug_hides_password() {
        let d = ConnectionDescriptor {
            host: "db1".to_string(),
            port: 5432,
            database: "app".to_string(),
            user: "admin".to_string(),
            password: Some("hunter2".to_string()),
        };
        let shown = format!("{d:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn apply_fills_matching_slot_only() {
        let mut snap = ServerSnapshot::unavailable(
            ServerIdentity::default(),
            0,
            None,
            None,
            Unavailability::new(crate::model::FailureKind::Timeout, "pending"),
        );
        let data = CategoryData::DatabaseSize(DatabaseSize { bytes: 1024 });
        assert_eq!(data.category(), Category::DatabaseSize);
        data.apply(&mut snap);
        assert!(snap.database_size.is_available());
        assert!(!snap.cache.is_available());
        assert_eq!(snap.unavailable_categories().len(), Category::ALL.len() - 1);
    }
}
