//! Run configuration: collector limits, classification thresholds, impact
//! weights, price table and server tier profiles.
//!
//! Everything here ships with defaults and can be overridden from a JSON file;
//! missing keys fall back to the defaults (`#[serde(default)]`). The analysis
//! and advisors receive `&Config` explicitly, there is no global state.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::{IssueKind, Severity};
use crate::model::{ComputeTier, StorageTier, TierClass};

/// Upper bound on per-server connections: the targets are often the
/// resource-starved servers being diagnosed.
pub const MAX_POOL_SIZE: usize = 5;

/// Error type for configuration loading and validation.
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read.
    Io(String),
    /// File is not valid JSON for [`Config`].
    Parse(String),
    /// A value is out of range or refers to an unknown tier.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub thresholds: Thresholds,
    pub impact: ImpactTable,
    pub advisor: AdvisorConfig,
    pub pricing: PriceTable,
    pub servers: ServerProfiles,
}

impl Config {
    /// Loads a JSON config file and validates it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Config =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collector;
        if c.pool_size == 0 || c.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::Invalid(format!(
                "collector.pool_size must be within 1..={}, got {}",
                MAX_POOL_SIZE, c.pool_size
            )));
        }
        if c.category_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "collector.category_timeout_ms must be positive".to_string(),
            ));
        }
        if self.thresholds.iops_bands.is_empty() {
            return Err(ConfigError::Invalid(
                "thresholds.iops_bands must not be empty".to_string(),
            ));
        }
        let mut prev = 0.0_f64;
        for band in &self.thresholds.iops_bands {
            match band.max_size_gb {
                Some(max) if max <= prev => {
                    return Err(ConfigError::Invalid(format!(
                        "thresholds.iops_bands must be ordered by max_size_gb ({} <= {})",
                        max, prev
                    )));
                }
                Some(max) => prev = max,
                None => {}
            }
        }
        if self.impact.total_midpoint() > 100.0 {
            return Err(ConfigError::Invalid(format!(
                "impact ranges must sum to at most 100% (midpoints sum to {:.2})",
                self.impact.total_midpoint()
            )));
        }
        for side in [&self.servers.baseline, &self.servers.comparison] {
            if let Some(id) = &side.compute_tier
                && self.pricing.compute(id).is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "unknown compute tier '{}'",
                    id
                )));
            }
            if let Some(id) = &side.storage_tier
                && self.pricing.storage(id).is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "unknown storage tier '{}'",
                    id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================
// Collector
// ============================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Connections per server (1..=5).
    pub pool_size: usize,
    /// Time bound for one metric category, including the wait for a pooled
    /// connection. Also applied as server-side `statement_timeout`.
    pub category_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            category_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl CollectorConfig {
    pub fn category_timeout(&self) -> Duration {
        Duration::from_millis(self.category_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ============================================================
// Thresholds
// ============================================================

/// Maps a "higher is worse" value to a severity.
///
/// `value >= critical` is critical, `>= high` is high, `>= medium` is medium,
/// anything lower is low.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityScale {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl SeverityScale {
    pub fn classify(&self, value: f64) -> Severity {
        if value >= self.critical {
            Severity::Critical
        } else if value >= self.high {
            Severity::High
        } else if value >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Minimum provisioned IOPS per GB for databases up to `max_size_gb`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IopsBand {
    pub name: String,
    /// Upper bound (exclusive) of the band; `None` for the last band.
    pub max_size_gb: Option<f64>,
    pub min_iops_per_gb: f64,
    /// IOPS class to recommend when the band minimum is not met.
    pub recommended_iops: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Heap cache hit ratio below this is an insufficient-memory issue.
    pub cache_hit_min_pct: f64,
    /// Severity by percentage points below `cache_hit_min_pct`.
    pub cache_deficit_severity: SeverityScale,
    /// RAM/data ratio below which memory severity is raised one level.
    pub ram_to_data_floor_pct: f64,
    /// Database size above which a burstable tier is a critical mismatch.
    pub burst_size_floor_gb: f64,
    /// Ordered by `max_size_gb`, last band open-ended.
    pub iops_bands: Vec<IopsBand>,
    /// Severity by percent shortfall against the band minimum.
    pub iops_shortfall_severity: SeverityScale,
    /// Parameters expected to differ between differently sized servers.
    pub drift_parameters: Vec<String>,
    /// Size ratio (larger/smaller) that counts as materially different.
    pub drift_size_ratio: f64,
    /// `seq_scan - idx_scan` must exceed this before a table is reported.
    pub scan_noise_floor: i64,
    /// Tables with fewer live rows are reported at low severity.
    pub scan_small_table_rows: i64,
    /// Tables at least this large are reported at high severity.
    pub scan_large_table_bytes: i64,
    /// Unused indexes at least this large are medium severity.
    pub unused_index_large_bytes: i64,
    /// Unused index share above the paired server's by more than this many
    /// percentage points raises unused-index severity one level.
    pub unused_index_gap_pp: f64,
    /// Dead tuple share above this is table bloat.
    pub bloat_floor_pct: f64,
    pub bloat_min_rows: i64,
    pub bloat_severity: SeverityScale,
    /// Autovacuum count ratio against the paired server.
    pub autovacuum_count_ratio: f64,
    /// Ratio at which autovacuum lag becomes high severity.
    pub autovacuum_severe_ratio: f64,
    /// Latest autovacuum must trail the paired server by at least this much.
    pub autovacuum_lag_secs: i64,
    pub long_query_floor_secs: f64,
    /// Severity by query age in hours.
    pub long_query_hours_severity: SeverityScale,
    /// Connection usage above the paired server's by more than this many
    /// percentage points is connection pressure.
    pub connection_usage_gap_pp: f64,
    /// Usage of `max_connections` at which connection pressure is high severity.
    pub connection_usage_high_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cache_hit_min_pct: 95.0,
            cache_deficit_severity: SeverityScale {
                critical: 30.0,
                high: 15.0,
                medium: 5.0,
            },
            ram_to_data_floor_pct: 10.0,
            burst_size_floor_gb: 50.0,
            iops_bands: vec![
                IopsBand {
                    name: "small".to_string(),
                    max_size_gb: Some(50.0),
                    min_iops_per_gb: 20.0,
                    recommended_iops: 2300,
                },
                IopsBand {
                    name: "medium".to_string(),
                    max_size_gb: Some(200.0),
                    min_iops_per_gb: 25.0,
                    recommended_iops: 5000,
                },
                IopsBand {
                    name: "large".to_string(),
                    max_size_gb: None,
                    min_iops_per_gb: 25.0,
                    recommended_iops: 7500,
                },
            ],
            iops_shortfall_severity: SeverityScale {
                critical: 75.0,
                high: 50.0,
                medium: 25.0,
            },
            drift_parameters: [
                "shared_buffers",
                "effective_cache_size",
                "work_mem",
                "maintenance_work_mem",
                "effective_io_concurrency",
                "random_page_cost",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            drift_size_ratio: 1.5,
            scan_noise_floor: 100,
            scan_small_table_rows: 10_000,
            scan_large_table_bytes: 1024 * 1024 * 1024,
            unused_index_large_bytes: 100 * 1024 * 1024,
            unused_index_gap_pp: 5.0,
            bloat_floor_pct: 20.0,
            bloat_min_rows: 1000,
            bloat_severity: SeverityScale {
                critical: 80.0,
                high: 50.0,
                medium: 20.0,
            },
            autovacuum_count_ratio: 1.5,
            autovacuum_severe_ratio: 3.0,
            autovacuum_lag_secs: 3600,
            long_query_floor_secs: 1800.0,
            long_query_hours_severity: SeverityScale {
                critical: 24.0,
                high: 4.0,
                medium: 1.0,
            },
            connection_usage_gap_pp: 20.0,
            connection_usage_high_pct: 80.0,
        }
    }
}

impl Thresholds {
    /// The IOPS band a database of `size_gb` falls into.
    pub fn iops_band(&self, size_gb: f64) -> Option<&IopsBand> {
        self.iops_bands
            .iter()
            .find(|b| b.max_size_gb.is_none_or(|max| size_gb < max))
    }
}

// ============================================================
// Impact
// ============================================================

/// Estimated share of the performance gap, in percent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImpactRange {
    pub low: f64,
    pub high: f64,
}

impl ImpactRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

/// Impact range per issue kind. Midpoints of all kinds sum to at most 100.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactTable {
    pub compute_tier_mismatch: ImpactRange,
    pub insufficient_memory: ImpactRange,
    pub insufficient_iops: ImpactRange,
    pub config_drift: ImpactRange,
    pub missing_index: ImpactRange,
    pub full_table_scan: ImpactRange,
    pub unused_index: ImpactRange,
    pub table_bloat: ImpactRange,
    pub autovacuum_lag: ImpactRange,
    pub long_running_query: ImpactRange,
    pub connection_pressure: ImpactRange,
}

impl Default for ImpactTable {
    fn default() -> Self {
        Self {
            compute_tier_mismatch: ImpactRange::new(55.0, 65.0),
            insufficient_memory: ImpactRange::new(15.0, 20.0),
            insufficient_iops: ImpactRange::new(8.0, 12.0),
            config_drift: ImpactRange::new(3.0, 5.0),
            missing_index: ImpactRange::new(2.0, 4.0),
            full_table_scan: ImpactRange::new(1.0, 2.0),
            unused_index: ImpactRange::new(0.0, 1.0),
            table_bloat: ImpactRange::new(1.0, 2.0),
            autovacuum_lag: ImpactRange::new(0.0, 1.0),
            long_running_query: ImpactRange::new(0.0, 1.0),
            connection_pressure: ImpactRange::new(0.0, 2.0),
        }
    }
}

impl ImpactTable {
    pub fn range(&self, kind: IssueKind) -> ImpactRange {
        match kind {
            IssueKind::ComputeTierMismatch => self.compute_tier_mismatch,
            IssueKind::InsufficientMemory => self.insufficient_memory,
            IssueKind::InsufficientIops => self.insufficient_iops,
            IssueKind::ConfigDrift => self.config_drift,
            IssueKind::MissingIndex => self.missing_index,
            IssueKind::FullTableScan => self.full_table_scan,
            IssueKind::UnusedIndex => self.unused_index,
            IssueKind::TableBloat => self.table_bloat,
            IssueKind::AutovacuumLag => self.autovacuum_lag,
            IssueKind::LongRunningQuery => self.long_running_query,
            IssueKind::ConnectionPressure => self.connection_pressure,
        }
    }

    pub fn total_midpoint(&self) -> f64 {
        IssueKind::ALL
            .iter()
            .map(|&k| self.range(k).midpoint())
            .sum()
    }
}

// ============================================================
// Advisor
// ============================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Target RAM as a share of database size when sizing a new tier.
    pub target_ram_to_data_pct: f64,
    pub min_recommended_ram_gb: f64,
    /// `shared_buffers` as a share of RAM.
    pub shared_buffers_pct: f64,
    /// `effective_cache_size` range as a share of RAM; the upper bound is
    /// recommended.
    pub effective_cache_size_pct: ImpactRange,
    pub effective_io_concurrency: i64,
    pub random_page_cost: f64,
    /// `work_mem` bounds in MB.
    pub work_mem_min_mb: u64,
    pub work_mem_max_mb: u64,
    /// Suggested `statement_timeout` for roles running runaway queries.
    pub statement_timeout_mins: u64,
    /// Per-table `autovacuum_vacuum_scale_factor` for bloated tables.
    pub table_vacuum_scale_factor: f64,
    /// Floors for the autovacuum worker settings on a lagging server.
    pub autovacuum_max_workers: i64,
    pub autovacuum_vacuum_cost_limit: i64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            target_ram_to_data_pct: 25.0,
            min_recommended_ram_gb: 8.0,
            shared_buffers_pct: 25.0,
            effective_cache_size_pct: ImpactRange::new(50.0, 75.0),
            effective_io_concurrency: 200,
            random_page_cost: 1.1,
            work_mem_min_mb: 4,
            work_mem_max_mb: 256,
            statement_timeout_mins: 30,
            table_vacuum_scale_factor: 0.05,
            autovacuum_max_workers: 6,
            autovacuum_vacuum_cost_limit: 2000,
        }
    }
}

// ============================================================
// Pricing
// ============================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputePrice {
    pub id: String,
    pub class: TierClass,
    pub vcores: u32,
    pub ram_gb: f64,
    pub monthly_cost: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoragePrice {
    pub id: String,
    pub size_gb: f64,
    pub iops: u32,
    pub monthly_cost: f64,
}

/// Monthly list prices by tier id. Classification logic never reads prices
/// directly, only through the lookups below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceTable {
    pub currency: String,
    pub compute: Vec<ComputePrice>,
    pub storage: Vec<StoragePrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let compute = |id: &str, class, vcores, ram_gb, monthly_cost| ComputePrice {
            id: id.to_string(),
            class,
            vcores,
            ram_gb,
            monthly_cost,
        };
        let storage = |id: &str, size_gb, iops, monthly_cost| StoragePrice {
            id: id.to_string(),
            size_gb,
            iops,
            monthly_cost,
        };
        Self {
            currency: "USD".to_string(),
            compute: vec![
                compute("B1ms", TierClass::Burstable, 1, 2.0, 12.41),
                compute("B2s", TierClass::Burstable, 2, 4.0, 24.82),
                compute("B2ms", TierClass::Burstable, 2, 8.0, 49.64),
                compute("D2ds_v5", TierClass::GeneralPurpose, 2, 8.0, 125.56),
                compute("D4ds_v5", TierClass::GeneralPurpose, 4, 16.0, 251.12),
                compute("D8ds_v5", TierClass::GeneralPurpose, 8, 32.0, 502.24),
                compute("D16ds_v5", TierClass::GeneralPurpose, 16, 64.0, 1004.48),
                compute("E4ds_v5", TierClass::MemoryOptimized, 4, 32.0, 317.55),
                compute("E8ds_v5", TierClass::MemoryOptimized, 8, 64.0, 635.10),
                compute("E16ds_v5", TierClass::MemoryOptimized, 16, 128.0, 1270.20),
            ],
            storage: vec![
                storage("P10", 128.0, 500, 19.71),
                storage("P15", 256.0, 1100, 38.02),
                storage("P20", 512.0, 2300, 73.22),
                storage("P30", 1024.0, 5000, 135.17),
                storage("P40", 2048.0, 7500, 259.05),
                storage("P50", 4096.0, 7500, 495.57),
            ],
        }
    }
}

impl PriceTable {
    pub fn compute(&self, id: &str) -> Option<&ComputePrice> {
        self.compute.iter().find(|c| c.id == id)
    }

    pub fn storage(&self, id: &str) -> Option<&StoragePrice> {
        self.storage.iter().find(|s| s.id == id)
    }

    /// Cheapest compute tier of an allowed class with at least `min_ram_gb`.
    /// Ties on price go to the earlier entry.
    pub fn cheapest_compute(
        &self,
        min_ram_gb: f64,
        allow: impl Fn(TierClass) -> bool,
    ) -> Option<&ComputePrice> {
        self.compute
            .iter()
            .filter(|c| allow(c.class) && c.ram_gb >= min_ram_gb)
            .fold(None, |best: Option<&ComputePrice>, c| match best {
                Some(b) if b.monthly_cost <= c.monthly_cost => Some(b),
                _ => Some(c),
            })
    }

    /// Cheapest storage tier with at least `min_iops` and `min_size_gb`.
    pub fn cheapest_storage(&self, min_iops: u32, min_size_gb: f64) -> Option<&StoragePrice> {
        self.storage
            .iter()
            .filter(|s| s.iops >= min_iops && s.size_gb >= min_size_gb)
            .fold(None, |best: Option<&StoragePrice>, s| match best {
                Some(b) if b.monthly_cost <= s.monthly_cost => Some(b),
                _ => Some(s),
            })
    }

    /// Price entry matching a storage descriptor, by id first, then by IOPS.
    pub fn storage_for(&self, tier: &StorageTier) -> Option<&StoragePrice> {
        self.storage(&tier.id)
            .or_else(|| self.storage.iter().find(|s| s.iops == tier.iops))
    }
}

// ============================================================
// Server profiles
// ============================================================

/// Operator-supplied tier ids for one server. The catalog cannot tell us
/// these; when absent the report marks them "unknown — assumed".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerProfile {
    pub compute_tier: Option<String>,
    pub storage_tier: Option<String>,
}

impl ServerProfile {
    pub fn resolve_compute(&self, pricing: &PriceTable) -> Option<ComputeTier> {
        let p = pricing.compute(self.compute_tier.as_deref()?)?;
        Some(ComputeTier {
            id: p.id.clone(),
            class: p.class,
            vcores: p.vcores,
            ram_gb: p.ram_gb,
        })
    }

    pub fn resolve_storage(&self, pricing: &PriceTable) -> Option<StorageTier> {
        let p = pricing.storage(self.storage_tier.as_deref()?)?;
        Some(StorageTier {
            id: p.id.clone(),
            iops: p.iops,
            size_gb: p.size_gb,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerProfiles {
    pub baseline: ServerProfile,
    pub comparison: ServerProfile,
}
