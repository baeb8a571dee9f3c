use crate::analysis::rules::{ComparisonRule, qualified_name};
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext, Severity};
use crate::fmt::{format_bytes, format_delta_pp, format_pct};
use crate::model::Side;

/// Indexes never scanned since statistics were last reset. Unique indexes
/// enforce constraints and are never reported.
///
/// A server whose unused share exceeds the paired server's by more than
/// `unused_index_gap_pp` gets one severity level more.
pub struct UnusedIndexRule;

impl ComparisonRule for UnusedIndexRule {
    fn id(&self) -> &'static str {
        "unused_index"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let large = t.unused_index_large_bytes;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let Some(stats) = ctx.snapshot(side).indexes.get() else {
                continue;
            };
            let droppable: Vec<_> = stats
                .unused
                .iter()
                .filter(|i| i.scans == 0 && !i.unique)
                .collect();
            if droppable.is_empty() {
                continue;
            }

            let total_bytes: i64 = droppable.iter().map(|i| i.size_bytes).sum();
            let mut severity = if droppable.iter().any(|i| i.size_bytes >= large) {
                Severity::Medium
            } else {
                Severity::Low
            };

            let mut evidence: Vec<Evidence> = droppable
                .iter()
                .map(|i| {
                    Evidence::new(
                        qualified_name(&i.schema, &i.index),
                        format!("0 scans on {}, {}", i.table, format_bytes(i.size_bytes)),
                    )
                })
                .collect();

            let paired = ctx
                .snapshot(side.other())
                .indexes
                .get()
                .and_then(|o| o.unused_pct());
            if let (Some(own_pct), Some(other_pct)) = (stats.unused_pct(), paired) {
                let gap = own_pct - other_pct;
                evidence.push(Evidence::new(
                    "Unused index share",
                    format!(
                        "{} vs {} on {} ({})",
                        format_pct(own_pct),
                        format_pct(other_pct),
                        side.other().short_label(),
                        format_delta_pp(gap)
                    ),
                ));
                if gap > t.unused_index_gap_pp {
                    severity = severity.escalate();
                }
            }

            let mut issue = ctx.issue(
                IssueKind::UnusedIndex,
                severity,
                side,
                format!(
                    "{} unused indexes holding {}",
                    droppable.len(),
                    format_bytes(total_bytes)
                ),
                evidence,
                total_bytes as f64,
            );
            issue.subjects = droppable
                .iter()
                .map(|i| qualified_name(&i.schema, &i.index))
                .collect();
            out.push(issue);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Collected, ComparativePair, IndexStats, IndexUsage};
    use crate::scenarios;

    fn eval(pair: &ComparativePair) -> Vec<Issue> {
        let config = Config::default();
        let ctx = RuleContext {
            pair,
            thresholds: &config.thresholds,
            impact: &config.impact,
        };
        UnusedIndexRule.evaluate(&ctx)
    }

    fn index(name: &str, size_bytes: i64, unique: bool) -> IndexUsage {
        IndexUsage {
            schema: "public".to_string(),
            table: "orders".to_string(),
            index: name.to_string(),
            scans: 0,
            size_bytes,
            unique,
        }
    }

    #[test]
    fn unique_indexes_are_never_reported() {
        let mut slow = scenarios::slow_server();
        slow.indexes = Collected::Available(IndexStats {
            total_indexes: 2,
            unused_indexes: 2,
            avg_scans: 0.0,
            unused: vec![
                index("orders_pkey", 500 << 20, true),
                index("orders_note_idx", 8 << 20, false),
            ],
        });
        let mut fast = scenarios::fast_server();
        fast.indexes = Collected::Available(IndexStats::default());
        let pair = ComparativePair::new(fast, slow);

        let issues = eval(&pair);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].subjects, vec!["public.orders_note_idx".to_string()]);
        assert_eq!(issues[0].severity, Severity::Low);
    }

    #[test]
    fn large_unused_index_raises_severity() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let slow = eval(&pair)
            .into_iter()
            .find(|i| i.side == Side::Comparison)
            .unwrap();
        assert_eq!(slow.severity, Severity::Medium);
    }

    #[test]
    fn larger_unused_share_than_paired_server_escalates() {
        let mut slow = scenarios::slow_server();
        slow.indexes = Collected::Available(IndexStats {
            total_indexes: 10,
            unused_indexes: 3,
            avg_scans: 12.0,
            unused: vec![
                index("orders_a_idx", 1 << 20, false),
                index("orders_b_idx", 1 << 20, false),
                index("orders_c_idx", 1 << 20, false),
            ],
        });
        let pair = ComparativePair::new(scenarios::fast_server(), slow);

        let slow = eval(&pair)
            .into_iter()
            .find(|i| i.side == Side::Comparison)
            .unwrap();

        assert_eq!(slow.severity, Severity::Medium);
        assert_eq!(
            slow.evidence.last().unwrap().value,
            "30.00% vs 2.50% on Server 1 (+27.50 pp)"
        );
    }

    #[test]
    fn similar_unused_share_keeps_severity() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let slow = eval(&pair)
            .into_iter()
            .find(|i| i.side == Side::Comparison)
            .unwrap();
        assert_eq!(slow.severity, Severity::Medium);
        assert_eq!(
            slow.evidence.last().unwrap().value,
            "4.17% vs 2.50% on Server 1 (+1.67 pp)"
        );
    }
}
