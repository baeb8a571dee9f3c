use serde::{Deserialize, Serialize};

use super::ServerSnapshot;

/// Which snapshot of the pair an issue or metric refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Server 1, by convention the fast one.
    Baseline,
    /// Server 2, by convention the slow one.
    Comparison,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Baseline, Side::Comparison];

    pub fn other(self) -> Side {
        match self {
            Side::Baseline => Side::Comparison,
            Side::Comparison => Side::Baseline,
        }
    }

    pub fn short_label(self) -> &'static str {
        match self {
            Side::Baseline => "Server 1",
            Side::Comparison => "Server 2",
        }
    }
}

/// The two snapshots under comparison. Owned for the lifetime of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparativePair {
    pub baseline: ServerSnapshot,
    pub comparison: ServerSnapshot,
}

impl ComparativePair {
    pub fn new(baseline: ServerSnapshot, comparison: ServerSnapshot) -> Self {
        Self {
            baseline,
            comparison,
        }
    }

    pub fn get(&self, side: Side) -> &ServerSnapshot {
        match side {
            Side::Baseline => &self.baseline,
            Side::Comparison => &self.comparison,
        }
    }

    /// True when one of the servers could not be collected at all.
    pub fn single_server_side(&self) -> Option<Side> {
        match (
            self.baseline.is_fully_unavailable(),
            self.comparison.is_fully_unavailable(),
        ) {
            (true, false) => Some(Side::Comparison),
            (false, true) => Some(Side::Baseline),
            _ => None,
        }
    }

    /// Comparison database size divided by baseline database size.
    pub fn size_ratio(&self) -> Option<f64> {
        ratio(self.comparison.database_gb()?, self.baseline.database_gb()?)
    }

    /// Comparison heap hit ratio minus baseline, in percentage points.
    pub fn cache_hit_delta(&self) -> Option<f64> {
        Some(self.comparison.heap_hit_pct()? - self.baseline.heap_hit_pct()?)
    }

    /// Comparison longest query duration divided by baseline.
    pub fn longest_query_ratio(&self) -> Option<f64> {
        ratio(
            self.comparison.longest_query_secs()?,
            self.baseline.longest_query_secs()?,
        )
    }

    pub fn iops_per_gb(&self, side: Side) -> Option<f64> {
        self.get(side).iops_per_gb()
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}
