use crate::analysis::rules::ComparisonRule;
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext};
use crate::fmt::{format_count, format_pct};
use crate::model::Side;

/// Provisioned IOPS per GB below the minimum of the database's size band.
///
/// Severity follows the shortfall relative to the band minimum:
/// `(1 - actual / minimum) * 100`.
pub struct InsufficientIopsRule;

impl ComparisonRule for InsufficientIopsRule {
    fn id(&self) -> &'static str {
        "insufficient_iops"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let snap = ctx.snapshot(side);
            let (Some(storage), Some(db_gb), Some(per_gb)) =
                (&snap.storage, snap.database_gb(), snap.iops_per_gb())
            else {
                continue;
            };
            let Some(band) = t.iops_band(db_gb) else {
                continue;
            };
            if per_gb >= band.min_iops_per_gb {
                continue;
            }

            let shortfall = (1.0 - per_gb / band.min_iops_per_gb) * 100.0;
            let severity = t.iops_shortfall_severity.classify(shortfall);

            out.push(ctx.issue(
                IssueKind::InsufficientIops,
                severity,
                side,
                format!(
                    "{} IOPS for {:.2} GB is {:.2} IOPS/GB, below the {} band minimum",
                    format_count(storage.iops as i64),
                    db_gb,
                    per_gb,
                    band.name
                ),
                vec![
                    Evidence::new(
                        "Provisioned IOPS",
                        format!("{} ({})", format_count(storage.iops as i64), storage.id),
                    ),
                    Evidence::new("Database size", format!("{db_gb:.2} GB")),
                    Evidence::new("IOPS per GB", format!("{per_gb:.2}")),
                    Evidence::new(
                        "Band minimum",
                        format!("{:.2} IOPS/GB ({} band)", band.min_iops_per_gb, band.name),
                    ),
                    Evidence::new("Shortfall", format_pct(shortfall)),
                    Evidence::new(
                        "Recommended IOPS class",
                        format_count(band.recommended_iops as i64),
                    ),
                ],
                shortfall,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Severity;
    use crate::config::Config;
    use crate::model::{ComparativePair, StorageTier};
    use crate::scenarios;

    fn eval(pair: &ComparativePair) -> Vec<Issue> {
        let config = Config::default();
        let ctx = RuleContext {
            pair,
            thresholds: &config.thresholds,
            impact: &config.impact,
        };
        InsufficientIopsRule.evaluate(&ctx)
    }

    #[test]
    fn scenario_1100_iops_on_171_gb() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());

        let issues = eval(&pair);

        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.side, Side::Comparison);
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.evidence[2].value, "6.43");
        let recommended = &issue.evidence[5].value;
        assert_eq!(recommended, "5,000");
    }

    #[test]
    fn unknown_storage_yields_no_issue() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::fast_server());
        assert!(eval(&pair).is_empty());
    }

    #[test]
    fn meeting_the_band_minimum_is_fine() {
        let mut slow = scenarios::slow_server();
        slow.storage = Some(StorageTier {
            id: "P30".to_string(),
            iops: 5000,
            size_gb: 1024.0,
        });
        let pair = ComparativePair::new(scenarios::fast_server(), slow);
        assert!(eval(&pair).is_empty());
    }
}
