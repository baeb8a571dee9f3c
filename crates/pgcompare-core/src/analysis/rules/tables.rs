use crate::analysis::rules::{ComparisonRule, qualified_name};
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext, Severity};
use crate::fmt::{format_bytes, format_count, format_pct};
use crate::model::Side;

// ============================================================
// SeqScanRule
// ============================================================

/// Sequential scans outnumbering index scans by more than the noise floor.
///
/// Tables without any index are reported as missing-index; tables that have
/// indexes the planner is not using are reported as full-table-scan. Small
/// tables are skipped: a sequential scan is the right plan for them.
pub struct SeqScanRule;

impl ComparisonRule for SeqScanRule {
    fn id(&self) -> &'static str {
        "seq_scan"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let Some(profiles) = ctx.snapshot(side).query_issues.get() else {
                continue;
            };

            for p in profiles {
                let excess = p.seq_minus_idx();
                if excess <= t.scan_noise_floor || p.live_rows < t.scan_small_table_rows {
                    continue;
                }

                let name = qualified_name(&p.schema, &p.table);
                let large = p.size_bytes >= t.scan_large_table_bytes;
                let (kind, severity, title) = if p.index_count == 0 {
                    let severity = if large { Severity::High } else { Severity::Medium };
                    (IssueKind::MissingIndex, severity, format!("{name} has no index"))
                } else {
                    let severity = if large { Severity::Medium } else { Severity::Low };
                    (
                        IssueKind::FullTableScan,
                        severity,
                        format!("{name} is mostly read by sequential scans"),
                    )
                };

                let mut issue = ctx.issue(
                    kind,
                    severity,
                    side,
                    title,
                    vec![Evidence::new(
                        name.clone(),
                        format!(
                            "seq_scan {}, idx_scan {}, {} indexes, {} rows, {}",
                            format_count(p.seq_scan),
                            format_count(p.idx_scan),
                            p.index_count,
                            format_count(p.live_rows),
                            format_bytes(p.size_bytes)
                        ),
                    )],
                    excess as f64,
                );
                issue.subjects.push(name);
                out.push(issue);
            }
        }
        out
    }
}

// ============================================================
// TableBloatRule
// ============================================================

/// Dead tuple share above the floor on tables with enough rows to matter.
pub struct TableBloatRule;

impl ComparisonRule for TableBloatRule {
    fn id(&self) -> &'static str {
        "table_bloat"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let Some(entries) = ctx.snapshot(side).bloat.get() else {
                continue;
            };

            for e in entries {
                if e.live_rows + e.dead_rows <= t.bloat_min_rows {
                    continue;
                }
                let Some(dead_pct) = e.dead_pct() else {
                    continue;
                };
                if dead_pct <= t.bloat_floor_pct {
                    continue;
                }

                let name = qualified_name(&e.schema, &e.table);
                let mut issue = ctx.issue(
                    IssueKind::TableBloat,
                    t.bloat_severity.classify(dead_pct),
                    side,
                    format!("{name} is {} dead tuples", format_pct(dead_pct)),
                    vec![Evidence::new(
                        name.clone(),
                        format!(
                            "{} dead / {} live ({}), {}",
                            format_count(e.dead_rows),
                            format_count(e.live_rows),
                            format_pct(dead_pct),
                            format_bytes(e.size_bytes)
                        ),
                    )],
                    dead_pct,
                );
                issue.subjects.push(name);
                out.push(issue);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{BloatEntry, Collected, ComparativePair, ScanProfile};
    use crate::scenarios;

    fn eval(rule: &dyn ComparisonRule, pair: &ComparativePair) -> Vec<Issue> {
        let config = Config::default();
        let ctx = RuleContext {
            pair,
            thresholds: &config.thresholds,
            impact: &config.impact,
        };
        rule.evaluate(&ctx)
    }

    #[test]
    fn classifies_missing_index_and_full_scan() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());

        let issues = eval(&SeqScanRule, &pair);

        let missing: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingIndex)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].subjects, vec!["public.audit_log".to_string()]);
        assert_eq!(missing[0].severity, Severity::High);

        let full: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::FullTableScan)
            .collect();
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].subjects, vec!["public.orders".to_string()]);
    }

    #[test]
    fn noise_floor_is_exclusive() {
        let mut slow = scenarios::slow_server();
        slow.query_issues = Collected::Available(vec![ScanProfile {
            schema: "public".to_string(),
            table: "t".to_string(),
            seq_scan: 100,
            idx_scan: 0,
            index_count: 0,
            live_rows: 50_000,
            size_bytes: 1 << 20,
        }]);
        let pair = ComparativePair::new(scenarios::fast_server(), slow);
        assert!(
            eval(&SeqScanRule, &pair)
                .iter()
                .all(|i| i.side == Side::Baseline)
        );
    }

    #[test]
    fn bloat_above_floor_only() {
        let mut slow = scenarios::slow_server();
        slow.bloat = Collected::Available(vec![
            BloatEntry {
                schema: "public".to_string(),
                table: "events".to_string(),
                live_rows: 600_000,
                dead_rows: 400_000,
                size_bytes: 1 << 30,
            },
            BloatEntry {
                schema: "public".to_string(),
                table: "users".to_string(),
                live_rows: 90_000,
                dead_rows: 10_000,
                size_bytes: 1 << 20,
            },
        ]);
        let pair = ComparativePair::new(scenarios::fast_server(), slow);

        let issues: Vec<_> = eval(&TableBloatRule, &pair)
            .into_iter()
            .filter(|i| i.side == Side::Comparison)
            .collect();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].subjects, vec!["public.events".to_string()]);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert_eq!(issues[0].magnitude, 40.0);
    }
}
