//! Comparative analysis: rules → ranker → advisors.
//!
//! Rules read a [`ComparativePair`] and emit [`Issue`]s. The ranker merges
//! and orders them into [`RankedCause`]s with impact buckets. Advisors turn
//! causes into [`Recommendation`]s. All of it is pure and single-threaded.

pub mod advisor;
pub mod ranker;
pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, ImpactRange, ImpactTable, Thresholds};
use crate::model::{Category, ComparativePair, ServerSnapshot, Side};

pub use advisor::{Action, Dependency, Recommendation, Relation};
pub use ranker::{ImpactBucket, RankedCause};

// ============================================================
// Core types
// ============================================================

/// Issue classes, in ranking priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    ComputeTierMismatch,
    InsufficientMemory,
    InsufficientIops,
    ConfigDrift,
    MissingIndex,
    FullTableScan,
    UnusedIndex,
    TableBloat,
    AutovacuumLag,
    LongRunningQuery,
    ConnectionPressure,
}

impl IssueKind {
    pub const ALL: [IssueKind; 11] = [
        IssueKind::ComputeTierMismatch,
        IssueKind::InsufficientMemory,
        IssueKind::InsufficientIops,
        IssueKind::ConfigDrift,
        IssueKind::MissingIndex,
        IssueKind::FullTableScan,
        IssueKind::UnusedIndex,
        IssueKind::TableBloat,
        IssueKind::AutovacuumLag,
        IssueKind::LongRunningQuery,
        IssueKind::ConnectionPressure,
    ];

    pub fn id(self) -> &'static str {
        match self {
            IssueKind::ComputeTierMismatch => "compute-tier-mismatch",
            IssueKind::InsufficientMemory => "insufficient-memory",
            IssueKind::InsufficientIops => "insufficient-iops",
            IssueKind::ConfigDrift => "config-drift",
            IssueKind::MissingIndex => "missing-index",
            IssueKind::FullTableScan => "full-table-scan",
            IssueKind::UnusedIndex => "unused-index",
            IssueKind::TableBloat => "table-bloat",
            IssueKind::AutovacuumLag => "autovacuum-lag",
            IssueKind::LongRunningQuery => "long-running-query",
            IssueKind::ConnectionPressure => "connection-pressure",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            IssueKind::ComputeTierMismatch => "Compute Tier Mismatch",
            IssueKind::InsufficientMemory => "Insufficient Memory",
            IssueKind::InsufficientIops => "Insufficient IOPS",
            IssueKind::ConfigDrift => "Configuration Drift",
            IssueKind::MissingIndex => "Missing Index",
            IssueKind::FullTableScan => "Full Table Scans",
            IssueKind::UnusedIndex => "Unused Indexes",
            IssueKind::TableBloat => "Table Bloat",
            IssueKind::AutovacuumLag => "Autovacuum Lag",
            IssueKind::LongRunningQuery => "Long-Running Query",
            IssueKind::ConnectionPressure => "Connection Pressure",
        }
    }

    /// Ranking tier: compute > memory > IOPS > drift > structural > activity.
    pub fn priority_tier(self) -> u8 {
        match self {
            IssueKind::ComputeTierMismatch => 0,
            IssueKind::InsufficientMemory => 1,
            IssueKind::InsufficientIops => 2,
            IssueKind::ConfigDrift => 3,
            IssueKind::MissingIndex
            | IssueKind::FullTableScan
            | IssueKind::UnusedIndex
            | IssueKind::TableBloat
            | IssueKind::AutovacuumLag => 4,
            IssueKind::LongRunningQuery | IssueKind::ConnectionPressure => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// One level up, saturating at critical.
    pub fn escalate(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

/// A literal metric value backing an issue, e.g. `("Cache hit ratio", "51.78%")`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub label: String,
    pub value: String,
}

impl Evidence {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub side: Side,
    pub title: String,
    pub evidence: Vec<Evidence>,
    /// Objects the issue is about: `schema.table`, `schema.index`, or a pid.
    pub subjects: Vec<String>,
    /// Rule-specific size of the deviation, used for tie-breaking.
    pub magnitude: f64,
    pub impact: ImpactRange,
}

/// An input that was not available, rendered as "unknown — assumed".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnknownInput {
    pub side: Side,
    pub subject: String,
    pub reason: String,
}

// ============================================================
// Rule context
// ============================================================

pub struct RuleContext<'a> {
    pub pair: &'a ComparativePair,
    pub thresholds: &'a Thresholds,
    pub impact: &'a ImpactTable,
}

impl<'a> RuleContext<'a> {
    pub fn snapshot(&self, side: Side) -> &'a ServerSnapshot {
        self.pair.get(side)
    }

    pub fn issue(
        &self,
        kind: IssueKind,
        severity: Severity,
        side: Side,
        title: String,
        evidence: Vec<Evidence>,
        magnitude: f64,
    ) -> Issue {
        Issue {
            kind,
            severity,
            side,
            title,
            evidence,
            subjects: Vec::new(),
            magnitude,
            impact: self.impact.range(kind),
        }
    }
}

// ============================================================
// Analyzer
// ============================================================

/// Everything derived from one pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Set when one server could not be reached at all.
    pub single_server: Option<Side>,
    pub unknowns: Vec<UnknownInput>,
    pub issues: Vec<Issue>,
    pub causes: Vec<RankedCause>,
    pub recommendations: Vec<Recommendation>,
}

pub struct Analyzer<'c> {
    config: &'c Config,
    rules: Vec<Box<dyn rules::ComparisonRule>>,
    advisors: Vec<Box<dyn advisor::Advisor>>,
}

impl<'c> Analyzer<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self {
            config,
            rules: rules::all_rules(),
            advisors: advisor::all_advisors(),
        }
    }

    pub fn analyze(&self, pair: &ComparativePair) -> Analysis {
        let ctx = RuleContext {
            pair,
            thresholds: &self.config.thresholds,
            impact: &self.config.impact,
        };

        let mut issues = Vec::new();
        for rule in &self.rules {
            issues.extend(rule.evaluate(&ctx));
        }

        let causes = ranker::rank(&issues, &self.config.impact);

        let advisor_ctx = advisor::AdvisorContext {
            pair,
            causes: &causes,
            config: self.config,
        };
        let recommendations = advisor::recommend(&self.advisors, &advisor_ctx);

        debug!(
            issues = issues.len(),
            causes = causes.len(),
            recommendations = recommendations.len(),
            "analysis finished"
        );

        Analysis {
            single_server: pair.single_server_side(),
            unknowns: unknown_inputs(pair),
            issues,
            causes,
            recommendations,
        }
    }
}

/// Unavailable categories and unsupplied tier descriptors, per side.
fn unknown_inputs(pair: &ComparativePair) -> Vec<UnknownInput> {
    let mut out = Vec::new();
    for side in Side::BOTH {
        let snap = pair.get(side);
        if snap.compute.is_none() {
            out.push(UnknownInput {
                side,
                subject: "Compute tier".to_string(),
                reason: "not supplied".to_string(),
            });
        }
        if snap.storage.is_none() {
            out.push(UnknownInput {
                side,
                subject: "Storage tier / IOPS".to_string(),
                reason: "not supplied".to_string(),
            });
        }
        for (category, u) in snap.unavailable_categories() {
            out.push(UnknownInput {
                side,
                subject: category.title().to_string(),
                reason: u.to_string(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn kinds_are_in_priority_order() {
        for w in IssueKind::ALL.windows(2) {
            assert!(w[0].priority_tier() <= w[1].priority_tier());
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn all_unavailable_pair_yields_nothing() {
        let pair = ComparativePair::new(
            scenarios::unavailable_server(),
            scenarios::unavailable_server(),
        );
        let config = Config::default();

        let analysis = Analyzer::new(&config).analyze(&pair);

        assert!(analysis.issues.is_empty());
        assert!(analysis.causes.is_empty());
        assert!(analysis.recommendations.is_empty());
        // two tier descriptors plus every category, per side
        assert_eq!(analysis.unknowns.len(), 2 * (2 + Category::ALL.len()));
    }

    #[test]
    fn every_single_unavailable_category_is_tolerated() {
        let config = Config::default();
        for category in Category::ALL {
            let mut slow = scenarios::slow_server();
            slow.set_unavailable(
                category,
                crate::model::Unavailability::new(crate::model::FailureKind::Timeout, "5000ms"),
            );
            let pair = ComparativePair::new(scenarios::fast_server(), slow);
            let analysis = Analyzer::new(&config).analyze(&pair);
            assert!(
                analysis
                    .unknowns
                    .iter()
                    .any(|u| u.side == Side::Comparison && u.subject == category.title()),
                "{category:?} not reported"
            );
        }
    }

    #[test]
    fn unknown_compute_tier_is_noted_not_inferred() {
        let config = Config::default();
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());

        let analysis = Analyzer::new(&config).analyze(&pair);

        assert!(pair.baseline.compute.is_none());
        assert!(analysis
            .unknowns
            .iter()
            .any(|u| u.side == Side::Baseline && u.subject == "Compute tier"));
        assert!(!analysis
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::ComputeTierMismatch && i.side == Side::Baseline));
    }
}
