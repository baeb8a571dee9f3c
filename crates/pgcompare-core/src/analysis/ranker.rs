//! Root-cause ranking: merge, group, order, attribute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Issue, IssueKind, Severity};
use crate::config::ImpactTable;
use crate::model::Side;

/// Share of the performance gap attributed to one cause, in whole percent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactBucket {
    pub low: u32,
    pub high: u32,
}

impl ImpactBucket {
    pub fn midpoint(&self) -> f64 {
        (self.low as f64 + self.high as f64) / 2.0
    }
}

/// One issue kind across the pair, with at most one merged issue per server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedCause {
    /// 1-based.
    pub rank: usize,
    pub kind: IssueKind,
    pub severity: Severity,
    pub magnitude: f64,
    /// Ordered baseline first.
    pub issues: Vec<Issue>,
    pub impact: ImpactBucket,
}

impl RankedCause {
    pub fn issue_for(&self, side: Side) -> Option<&Issue> {
        self.issues.iter().find(|i| i.side == side)
    }

    pub fn affects(&self, side: Side) -> bool {
        self.issue_for(side).is_some()
    }

    pub fn sides(&self) -> Vec<Side> {
        self.issues.iter().map(|i| i.side).collect()
    }
}

/// Merges duplicates, groups by kind and assigns impact buckets.
///
/// Causes are ordered by priority tier, then severity, then kind. Magnitudes
/// carry per-kind units (bytes, percent, scan counts) and are only compared
/// inside one kind while merging.
///
/// Identical input always yields identical output: merging goes through
/// ordered maps and the final sort is total.
pub fn rank(issues: &[Issue], impact: &ImpactTable) -> Vec<RankedCause> {
    let mut merged: BTreeMap<(IssueKind, Side), Issue> = BTreeMap::new();
    for issue in issues {
        match merged.get_mut(&(issue.kind, issue.side)) {
            Some(existing) => merge_into(existing, issue),
            None => {
                merged.insert((issue.kind, issue.side), issue.clone());
            }
        }
    }

    let mut grouped: BTreeMap<IssueKind, Vec<Issue>> = BTreeMap::new();
    for ((kind, _), issue) in merged {
        grouped.entry(kind).or_default().push(issue);
    }

    let mut causes: Vec<RankedCause> = grouped
        .into_iter()
        .filter_map(|(kind, issues)| {
            let severity = issues.iter().map(|i| i.severity).max()?;
            let magnitude = issues
                .iter()
                .map(|i| i.magnitude)
                .fold(f64::NEG_INFINITY, f64::max);
            Some(RankedCause {
                rank: 0,
                kind,
                severity,
                magnitude,
                issues,
                impact: ImpactBucket { low: 0, high: 0 },
            })
        })
        .collect();

    causes.sort_by(|a, b| {
        a.kind
            .priority_tier()
            .cmp(&b.kind.priority_tier())
            .then(b.severity.cmp(&a.severity))
            .then(a.kind.cmp(&b.kind))
    });

    assign_buckets(&mut causes, impact);
    for (i, cause) in causes.iter_mut().enumerate() {
        cause.rank = i + 1;
    }
    causes
}

fn merge_into(existing: &mut Issue, issue: &Issue) {
    if issue.severity > existing.severity {
        existing.severity = issue.severity;
        existing.title = issue.title.clone();
    }
    existing.evidence.extend(issue.evidence.iter().cloned());
    existing.subjects.extend(issue.subjects.iter().cloned());
    existing.magnitude = existing.magnitude.max(issue.magnitude);
}

/// Scales the configured ranges of the kinds present so their midpoints add
/// up to the full table's total (at most 100), then floors to whole percent.
///
/// The factor never exceeds the one that would lift the heaviest configured
/// kind to the total, so a lone minor cause keeps a bucket in proportion to
/// its own weight instead of claiming the whole gap.
fn assign_buckets(causes: &mut [RankedCause], impact: &ImpactTable) {
    let present: f64 = causes
        .iter()
        .map(|c| impact.range(c.kind).midpoint())
        .sum();
    let target = impact.total_midpoint().min(100.0);
    let heaviest = IssueKind::ALL
        .iter()
        .map(|&k| impact.range(k).high)
        .fold(0.0, f64::max);
    let mut factor = if present > 0.0 { target / present } else { 1.0 };
    if heaviest > 0.0 {
        factor = factor.min(target / heaviest);
    }

    for cause in causes.iter_mut() {
        let range = impact.range(cause.kind);
        let low = (range.low * factor).clamp(0.0, 100.0).floor() as u32;
        let high = (range.high * factor).clamp(0.0, 100.0).floor() as u32;
        cause.impact = ImpactBucket {
            low,
            high: high.max(low),
        };
    }
}
