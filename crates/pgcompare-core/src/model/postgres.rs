//! PostgreSQL metrics collected from catalog and statistics views.
//!
//! One struct per metric category. Counters are kept as `i64` because that is
//! what `bigint` columns decode to; derived ratios are computed on demand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry from `pg_settings`.
///
/// Source: `SELECT name, setting, unit, current_setting(name) FROM pg_settings`
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct PgSetting {
    pub name: String,
    /// Raw value in `unit` units (e.g. `16384` with unit `8kB`).
    pub setting: String,
    /// Unit as reported by the server, empty for unitless settings.
    pub unit: String,
    /// Server-formatted value (e.g. `128MB`).
    pub display: String,
}

impl PgSetting {
    /// Value in bytes for memory settings, `None` for non-memory settings.
    ///
    /// Handles the units PostgreSQL uses for memory: `B`, `kB`, `MB`, `GB`,
    /// `TB` with an optional numeric prefix (`8kB` for block-sized settings).
    pub fn bytes(&self) -> Option<u64> {
        let value: u64 = self.setting.trim().parse().ok()?;
        let unit = self.unit.trim();
        let digits_end = unit
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(unit.len());
        let (count, suffix) = unit.split_at(digits_end);
        let count: u64 = if count.is_empty() {
            1
        } else {
            count.parse().ok()?
        };
        let scale: u64 = match suffix {
            "B" => 1,
            "kB" => 1024,
            "MB" => 1024 * 1024,
            "GB" => 1024 * 1024 * 1024,
            "TB" => 1024 * 1024 * 1024 * 1024,
            _ => return None,
        };
        value.checked_mul(count)?.checked_mul(scale)
    }

    /// Value as a float for numeric unitless settings.
    pub fn numeric(&self) -> Option<f64> {
        self.setting.trim().parse().ok()
    }
}

/// Server version and the configuration parameters the analysis reads.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Source: `current_setting('server_version')`
    pub server_version: String,
    /// Source: `current_setting('server_version_num')`
    pub server_version_num: Option<i32>,
    pub entries: BTreeMap<String, PgSetting>,
}

impl Settings {
    pub fn get(&self, name: &str) -> Option<&PgSetting> {
        self.entries.get(name)
    }

    pub fn display(&self, name: &str) -> Option<&str> {
        self.get(name).map(|s| s.display.as_str())
    }

    pub fn bytes(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(PgSetting::bytes)
    }

    pub fn shared_buffers_level(&self) -> Option<BufferLevel> {
        self.bytes("shared_buffers").map(BufferLevel::of)
    }
}

/// Coarse sizing of `shared_buffers`, counted in 8kB buffer pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BufferLevel {
    /// Under 1,000,000 pages (about 7.6 GB).
    Low,
    /// Under 4,000,000 pages (about 30.5 GB).
    Medium,
    High,
}

impl BufferLevel {
    const PAGE_BYTES: u64 = 8192;

    pub fn of(bytes: u64) -> Self {
        match bytes / Self::PAGE_BYTES {
            p if p < 1_000_000 => BufferLevel::Low,
            p if p < 4_000_000 => BufferLevel::Medium,
            _ => BufferLevel::High,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BufferLevel::Low => "LOW",
            BufferLevel::Medium => "MEDIUM",
            BufferLevel::High => "HIGH",
        }
    }
}

/// Session counts from `pg_stat_activity`.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub max_connections: i64,
    pub current: i64,
    pub active: i64,
    pub idle: i64,
}

impl ConnectionStats {
    pub fn usage_pct(&self) -> Option<f64> {
        (self.max_connections > 0)
            .then(|| self.current as f64 * 100.0 / self.max_connections as f64)
    }
}

/// Buffer cache counters summed over `pg_statio_user_tables`.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub heap_blks_read: i64,
    pub heap_blks_hit: i64,
    pub idx_blks_read: i64,
    pub idx_blks_hit: i64,
}

impl CacheStats {
    /// Heap cache hit ratio in percent, two decimals. `None` when no blocks
    /// were touched.
    pub fn heap_hit_pct(&self) -> Option<f64> {
        hit_pct(self.heap_blks_hit, self.heap_blks_read)
    }

    pub fn index_hit_pct(&self) -> Option<f64> {
        hit_pct(self.idx_blks_hit, self.idx_blks_read)
    }
}

/// Rounded to two decimals, the precision it is reported and compared at.
fn hit_pct(hit: i64, read: i64) -> Option<f64> {
    let total = hit + read;
    (total > 0).then(|| (hit as f64 * 10_000.0 / total as f64).round() / 100.0)
}

/// Source: `pg_database_size(current_database())`
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseSize {
    pub bytes: i64,
}

impl DatabaseSize {
    pub fn gb(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Aggregates over `pg_stat_user_tables`.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSummary {
    pub total_tables: i64,
    pub avg_live_rows: f64,
    pub max_live_rows: i64,
    pub avg_dead_rows: f64,
    pub total_dead_rows: i64,
}

/// One row of `pg_stat_user_indexes` with zero scans.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexUsage {
    pub schema: String,
    pub table: String,
    pub index: String,
    pub scans: i64,
    pub size_bytes: i64,
    /// Unique and primary-key indexes enforce constraints and are never
    /// suggested for removal.
    pub unique: bool,
}

/// Aggregates over `pg_stat_user_indexes`.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_indexes: i64,
    pub unused_indexes: i64,
    pub avg_scans: f64,
    /// Largest unused indexes first.
    pub unused: Vec<IndexUsage>,
}

impl IndexStats {
    pub fn unused_pct(&self) -> Option<f64> {
        (self.total_indexes > 0)
            .then(|| self.unused_indexes as f64 * 100.0 / self.total_indexes as f64)
    }
}

/// Lock counts from `pg_locks` and waiting sessions from `pg_stat_activity`.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct LockStats {
    pub blocked: i64,
    pub active: i64,
    pub waiting_queries: i64,
}

/// A backend from `pg_stat_activity` with the age of its current query.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionQuery {
    pub pid: i32,
    pub user: String,
    pub state: String,
    /// Seconds since `query_start`.
    pub duration_secs: f64,
    /// First 150 characters of the query text.
    pub query: String,
}

impl SessionQuery {
    /// True for queries that only read system catalogs or statistics views.
    pub fn is_catalog_query(&self) -> bool {
        let q = self.query.to_ascii_lowercase();
        let touches_catalog = q.contains("pg_catalog.")
            || q.contains("information_schema.")
            || q.contains("pg_stat")
            || q.contains("pg_class")
            || q.contains("pg_namespace")
            || q.contains("pg_attribute")
            || q.contains("pg_index")
            || q.contains("pg_settings")
            || q.contains("pg_locks")
            || q.contains("pg_database");
        let writes = ["insert ", "update ", "delete ", "merge "]
            .iter()
            .any(|kw| q.trim_start().starts_with(kw));
        touches_catalog && !writes
    }
}

/// A table with a notable number of dead tuples.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BloatEntry {
    pub schema: String,
    pub table: String,
    pub live_rows: i64,
    pub dead_rows: i64,
    pub size_bytes: i64,
}

impl BloatEntry {
    pub fn dead_pct(&self) -> Option<f64> {
        let total = self.live_rows + self.dead_rows;
        (total > 0).then(|| self.dead_rows as f64 * 100.0 / total as f64)
    }
}

/// Sequential vs index scan profile of one table.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanProfile {
    pub schema: String,
    pub table: String,
    pub seq_scan: i64,
    pub idx_scan: i64,
    /// Number of indexes defined on the table (0 = no index at all).
    pub index_count: i64,
    pub live_rows: i64,
    pub size_bytes: i64,
}

impl ScanProfile {
    pub fn seq_minus_idx(&self) -> i64 {
        self.seq_scan - self.idx_scan
    }
}

/// Vacuum/analyze history of one table. Timestamps are epoch seconds.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct VacuumStats {
    pub schema: String,
    pub table: String,
    pub last_vacuum: Option<i64>,
    pub last_autovacuum: Option<i64>,
    pub last_analyze: Option<i64>,
    pub last_autoanalyze: Option<i64>,
    pub vacuum_count: i64,
    pub autovacuum_count: i64,
    pub analyze_count: i64,
    pub autoanalyze_count: i64,
}

/// Autovacuum activity over all user tables plus the most recently vacuumed
/// tables.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct AutovacuumStats {
    pub total_autovacuum_count: i64,
    pub total_autoanalyze_count: i64,
    /// Most recent `last_autovacuum` over all tables.
    pub latest_autovacuum: Option<i64>,
    /// Ordered by `last_autovacuum` descending.
    pub tables: Vec<VacuumStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(value: &str, unit: &str) -> PgSetting {
        PgSetting {
            name: "x".to_string(),
            setting: value.to_string(),
            unit: unit.to_string(),
            display: String::new(),
        }
    }

    #[test]
    fn setting_bytes_handles_block_units() {
        assert_eq!(setting("16384", "8kB").bytes(), Some(128 * 1024 * 1024));
        assert_eq!(setting("4096", "kB").bytes(), Some(4 * 1024 * 1024));
        assert_eq!(setting("2", "GB").bytes(), Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn shared_buffers_level_boundaries() {
        assert_eq!(BufferLevel::of(128 * 1024 * 1024), BufferLevel::Low);
        assert_eq!(BufferLevel::of(999_999 * 8192), BufferLevel::Low);
        assert_eq!(BufferLevel::of(1_000_000 * 8192), BufferLevel::Medium);
        assert_eq!(BufferLevel::of(3_999_999 * 8192), BufferLevel::Medium);
        assert_eq!(BufferLevel::of(4_000_000 * 8192), BufferLevel::High);

        let mut entries = BTreeMap::new();
        entries.insert(
            "shared_buffers".to_string(),
            PgSetting {
                name: "shared_buffers".to_string(),
                setting: "2097152".to_string(),
                unit: "8kB".to_string(),
                display: "16GB".to_string(),
            },
        );
        let settings = Settings {
            entries,
            ..Default::default()
        };
        assert_eq!(settings.shared_buffers_level(), Some(BufferLevel::Medium));
        assert_eq!(Settings::default().shared_buffers_level(), None);
    }

    #[test]
    fn setting_bytes_is_none_for_unitless() {
        assert_eq!(setting("200", "").bytes(), None);
        assert_eq!(setting("on", "").bytes(), None);
        assert_eq!(setting("1.1", "").numeric(), Some(1.1));
    }

    #[test]
    fn cache_hit_pct_none_without_traffic() {
        assert_eq!(CacheStats::default().heap_hit_pct(), None);
        let c = CacheStats {
            heap_blks_read: 25,
            heap_blks_hit: 75,
            ..Default::default()
        };
        assert_eq!(c.heap_hit_pct(), Some(75.0));
    }

    #[test]
    fn cache_hit_pct_is_rounded_to_two_decimals() {
        let c = CacheStats {
            heap_blks_read: 50_040,
            heap_blks_hit: 949_960,
            idx_blks_read: 1,
            idx_blks_hit: 2,
        };
        assert_eq!(c.heap_hit_pct(), Some(95.0));
        assert_eq!(c.index_hit_pct(), Some(66.67));
    }

    #[test]
    fn catalog_query_detection() {
        let q = |text: &str| SessionQuery {
            query: text.to_string(),
            ..Default::default()
        };
        assert!(q("SELECT c.relname FROM pg_catalog.pg_class c").is_catalog_query());
        assert!(q("select * from information_schema.columns").is_catalog_query());
        assert!(!q("SELECT * FROM orders WHERE id = $1").is_catalog_query());
        assert!(!q("UPDATE pg_stat_mirror SET x = 1").is_catalog_query());
    }
}
